//! Backend-managed settings endpoints.
//!
//! The pipeline polls the backend for settings on its own schedule; these
//! endpoints show which revision is in force and let an operator pull a new
//! one without waiting for the next refresh.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sightline_core::SettingsPatch;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the settings router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_settings))
        .route("/refresh", post(refresh_settings))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Remote settings in force.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "revision": 12, "overrides": { "background_scan_ms": 30000 } }))]
pub struct SettingsResponse {
    /// Accepted backend revision; absent while the local configuration applies.
    pub revision: Option<u64>,

    /// Fields the backend overrides.
    pub overrides: Option<SettingsPatch>,
}

/// Result of a settings refresh.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "changed": true, "revision": 13 }))]
pub struct SettingsRefreshResponse {
    /// Whether the effective configuration changed.
    #[schema(example = true)]
    pub changed: bool,

    /// Revision in force after the refresh.
    pub revision: Option<u64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the remote settings in force.
#[utoipa::path(
    get,
    path = "/api/settings",
    tag = "settings",
    operation_id = "getSettings",
    summary = "Get backend settings",
    responses(
        (status = 200, description = "Revision and overrides in force", body = SettingsResponse)
    )
)]
pub async fn get_settings(State(state): State<SharedState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        revision: state.orchestrator.settings_revision(),
        overrides: state.orchestrator.settings_overrides(),
    })
}

/// Fetch settings from the backend now.
#[utoipa::path(
    post,
    path = "/api/settings/refresh",
    tag = "settings",
    operation_id = "refreshSettings",
    summary = "Refresh backend settings",
    description = "Asks the backend for a newer revision and applies it to the \
        scanner, resolver and history upload. A withdrawn revision reverts to the \
        local configuration. A revision that would make the configuration invalid \
        is rejected and the previous one stays in force.",
    responses(
        (status = 200, description = "Refresh completed", body = SettingsRefreshResponse),
        (status = 400, description = "Revision rejected", body = ErrorResponse),
        (status = 424, description = "Backend refused the credential", body = ErrorResponse),
        (status = 502, description = "Backend answered with an error", body = ErrorResponse),
        (status = 503, description = "Backend unreachable", body = ErrorResponse),
        (status = 504, description = "Backend timed out", body = ErrorResponse)
    )
)]
pub async fn refresh_settings(
    State(state): State<SharedState>,
) -> ApiResult<Json<SettingsRefreshResponse>> {
    let changed = state.orchestrator.refresh_settings().await?;
    Ok(Json(SettingsRefreshResponse {
        changed,
        revision: state.orchestrator.settings_revision(),
    }))
}
