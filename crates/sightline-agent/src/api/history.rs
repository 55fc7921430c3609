//! History buffer endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sightline_core::HistoryCounts;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the history router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_history).delete(purge_history))
        .route("/flush", post(flush_history))
}

/// Buffered record counts plus parked deliveries.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "buffered": { "scans": 4, "actions": 1, "conversions": 1, "suppression_keys": 1 },
    "pending_deliveries": 0
}))]
pub struct HistoryResponse {
    /// Records waiting for upload.
    pub buffered: HistoryCounts,

    /// Actions waiting for their delivery time.
    #[schema(example = 0)]
    pub pending_deliveries: usize,
}

/// Flush outcome.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "uploaded": 6 }))]
pub struct FlushResponse {
    /// Number of records the backend accepted.
    #[schema(example = 6)]
    pub uploaded: usize,
}

/// Get buffered history counts.
#[utoipa::path(
    get,
    path = "/api/history",
    tag = "history",
    operation_id = "getHistory",
    summary = "Get buffered history counts",
    responses(
        (status = 200, description = "Counts retrieved", body = HistoryResponse)
    )
)]
pub async fn get_history(State(state): State<SharedState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        buffered: state.orchestrator.history().counts(),
        pending_deliveries: state.orchestrator.pending_deliveries().len(),
    })
}

/// Upload buffered history now.
#[utoipa::path(
    post,
    path = "/api/history/flush",
    tag = "history",
    operation_id = "flushHistory",
    summary = "Upload buffered history",
    description = "Uploads every buffered record and waits for the backend. On \
        failure the records stay buffered for the next attempt.",
    responses(
        (status = 200, description = "History uploaded", body = FlushResponse),
        (status = 424, description = "Backend rejected the upload", body = ErrorResponse),
        (status = 502, description = "Backend failed", body = ErrorResponse),
        (status = 503, description = "Backend unreachable", body = ErrorResponse)
    )
)]
pub async fn flush_history(State(state): State<SharedState>) -> ApiResult<Json<FlushResponse>> {
    let uploaded = state.orchestrator.flush_history().await?;
    Ok(Json(FlushResponse { uploaded }))
}

/// Drop all history.
#[utoipa::path(
    delete,
    path = "/api/history",
    tag = "history",
    operation_id = "purgeHistory",
    summary = "Purge history",
    description = "Drops buffered records, suppression state and parked deliveries. \
        Use after the backend credential changes.",
    responses(
        (status = 204, description = "History purged")
    )
)]
pub async fn purge_history(State(state): State<SharedState>) -> StatusCode {
    state.orchestrator.purge_history();
    StatusCode::NO_CONTENT
}
