//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `presence` - Beacons in range
//! - `sightings` - Sighting ingestion for the bridge radio
//! - `scanner` - Duty cycle control and host lifecycle
//! - `actions` - Delivered actions and conversion feedback
//! - `history` - History counts, flush and purge
//! - `settings` - Backend-managed settings
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use chrono::DateTime;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod actions;
pub mod error;
pub mod health;
pub mod history;
pub mod openapi;
pub mod presence;
pub mod scanner;
pub mod settings;
pub mod sightings;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::{get_openapi_json, ApiDoc};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                 - Health check
/// /swagger-ui             - Interactive API documentation
/// /api
/// ├── /presence           - Beacons in range (GET, DELETE)
/// ├── /sightings          - Sighting ingestion
/// ├── /scanner            - State, start, stop
/// ├── /lifecycle          - Foreground / background
/// ├── /actions            - Delivered actions
/// ├── /conversions        - Conversion feedback
/// ├── /history            - Counts, flush, purge
/// ├── /settings           - Backend settings, refresh
/// └── /openapi.json       - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/presence", presence::router())
                .nest("/sightings", sightings::router())
                .nest("/scanner", scanner::router())
                .nest("/lifecycle", scanner::lifecycle_router())
                .nest("/actions", actions::router())
                .nest("/conversions", actions::conversions_router())
                .nest("/history", history::router())
                .nest("/settings", settings::router()),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Format epoch milliseconds as RFC 3339, or an empty string if out of range.
pub(crate) fn millis_to_rfc3339(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
