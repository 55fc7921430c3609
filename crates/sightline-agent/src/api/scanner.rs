//! Scanner control and host lifecycle endpoints.
//!
//! `start`/`stop` switch the duty cycle on and off. The lifecycle endpoints
//! tell the pipeline whether the host application is in the foreground, which
//! selects the shorter foreground scan/wait windows and refreshes the layout.

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sightline_core::ScannerState;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the scanner router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_scanner))
        .route("/start", post(start_scanner))
        .route("/stop", post(stop_scanner))
}

/// Creates the lifecycle router.
pub fn lifecycle_router() -> Router<SharedState> {
    Router::new()
        .route("/foreground", put(enter_foreground))
        .route("/background", put(enter_background))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Scanner status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "state": "scanning" }))]
pub struct ScannerStatusResponse {
    /// Lifecycle state after the request was processed.
    pub state: ScannerState,
}

/// Lifecycle change acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "foreground": true, "state": "paused" }))]
pub struct LifecycleResponse {
    /// Whether the foreground timings are now in effect.
    #[schema(example = true)]
    pub foreground: bool,

    /// Scanner state after the change.
    pub state: ScannerState,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the scanner state.
#[utoipa::path(
    get,
    path = "/api/scanner",
    tag = "scanner",
    operation_id = "getScanner",
    summary = "Get scanner state",
    responses(
        (status = 200, description = "Scanner state", body = ScannerStatusResponse),
        (status = 503, description = "Pipeline has shut down", body = ErrorResponse)
    )
)]
pub async fn get_scanner(State(state): State<SharedState>) -> ApiResult<Json<ScannerStatusResponse>> {
    let scanner_state = state.orchestrator.scanner_state().await?;
    Ok(Json(ScannerStatusResponse {
        state: scanner_state,
    }))
}

/// Start scanning.
#[utoipa::path(
    post,
    path = "/api/scanner/start",
    tag = "scanner",
    operation_id = "startScanner",
    summary = "Start the duty cycle",
    description = "Starts scanning. Starting a running scanner is a no-op. If the \
        scanner was stopped for longer than the restart timeout, presence is \
        cleared first.",
    responses(
        (status = 200, description = "Scanner started", body = ScannerStatusResponse),
        (status = 503, description = "Pipeline has shut down", body = ErrorResponse)
    )
)]
pub async fn start_scanner(State(state): State<SharedState>) -> ApiResult<Json<ScannerStatusResponse>> {
    state.orchestrator.start()?;
    get_scanner(State(state)).await
}

/// Stop scanning.
#[utoipa::path(
    post,
    path = "/api/scanner/stop",
    tag = "scanner",
    operation_id = "stopScanner",
    summary = "Stop the duty cycle",
    description = "Stops scanning and cancels pending retries. Presence is kept so \
        a quick restart continues open dwells.",
    responses(
        (status = 200, description = "Scanner stopped", body = ScannerStatusResponse),
        (status = 503, description = "Pipeline has shut down", body = ErrorResponse)
    )
)]
pub async fn stop_scanner(State(state): State<SharedState>) -> ApiResult<Json<ScannerStatusResponse>> {
    state.orchestrator.stop()?;
    get_scanner(State(state)).await
}

/// The host application came to the foreground.
#[utoipa::path(
    put,
    path = "/api/lifecycle/foreground",
    tag = "scanner",
    operation_id = "enterForeground",
    summary = "Switch to foreground timings",
    description = "Switches to foreground scan/wait windows, refreshes the beacon \
        layout and flushes history.",
    responses(
        (status = 200, description = "Foreground timings active", body = LifecycleResponse),
        (status = 503, description = "Pipeline has shut down", body = ErrorResponse)
    )
)]
pub async fn enter_foreground(State(state): State<SharedState>) -> ApiResult<Json<LifecycleResponse>> {
    state.orchestrator.on_foreground()?;
    let scanner_state = state.orchestrator.scanner_state().await?;
    Ok(Json(LifecycleResponse {
        foreground: true,
        state: scanner_state,
    }))
}

/// The host application went to the background.
#[utoipa::path(
    put,
    path = "/api/lifecycle/background",
    tag = "scanner",
    operation_id = "enterBackground",
    summary = "Switch to background timings",
    description = "Switches to background scan/wait windows and flushes history.",
    responses(
        (status = 200, description = "Background timings active", body = LifecycleResponse),
        (status = 503, description = "Pipeline has shut down", body = ErrorResponse)
    )
)]
pub async fn enter_background(State(state): State<SharedState>) -> ApiResult<Json<LifecycleResponse>> {
    state.orchestrator.on_background()?;
    let scanner_state = state.orchestrator.scanner_state().await?;
    Ok(Json(LifecycleResponse {
        foreground: false,
        state: scanner_state,
    }))
}
