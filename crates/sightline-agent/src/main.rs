//! # sightline-agent
//!
//! Daemon running the sightline beacon pipeline.
//!
//! This binary provides:
//! - The scanner, resolver, history and delivery pipeline
//! - REST API for sighting ingestion, presence, actions and history
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package sightline-agent
//!
//! # Production
//! SIGHTLINE__LOGGING__PRODUCTION=true SIGHTLINE__BACKEND__API_KEY=... ./sightline-agent
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;

use anyhow::Context;
use sightline_agent::state::AppState;
use sightline_agent::{api, logging};
use sightline_core::SightlineConfig;
use tokio::net::TcpListener;
use tracing::info;

/// Listen address unless `SIGHTLINE_BIND` overrides it.
const DEFAULT_BIND: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SightlineConfig::load().context("Failed to load configuration")?;
    logging::init(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sightline-agent");

    let state = AppState::from_config(config)?;
    state.orchestrator.start()?;

    let app = api::create_router(state.clone());

    let addr: SocketAddr = std::env::var("SIGHTLINE_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()
        .context("SIGHTLINE_BIND is not a socket address")?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.orchestrator.stop()?;
    state.orchestrator.shutdown();
    info!("sightline-agent stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
