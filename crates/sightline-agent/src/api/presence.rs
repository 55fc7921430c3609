//! Presence API endpoints.
//!
//! Lists the beacons the scanner currently considers in range, and lets an
//! operator forget them all.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sightline_core::PresenceEntry;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::api::millis_to_rfc3339;
use crate::state::SharedState;

/// Creates the presence router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_presence).delete(clear_presence))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// A beacon currently in range.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "beacon": "f7826da6-4fa2-4e98-8024-bc5b71e0893e:42:7",
    "last_seen_utc": "2025-01-15T09:30:00+00:00",
    "pairing_id": "0b6c3c36-7f0e-4a55-9d1e-3f6b2f9c1a77",
    "accumulated_pause_ms": 0
}))]
pub struct PresentBeacon {
    /// Beacon identifier.
    #[schema(example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e:42:7")]
    pub beacon: String,

    /// When the beacon was last sighted.
    #[schema(example = "2025-01-15T09:30:00+00:00")]
    pub last_seen_utc: String,

    /// Dwell token shared by the entry and the future exit event.
    pub pairing_id: Uuid,

    /// Radio-off time excluded from the absence calculation.
    #[schema(example = 0)]
    pub accumulated_pause_ms: u64,
}

impl From<PresenceEntry> for PresentBeacon {
    fn from(entry: PresenceEntry) -> Self {
        Self {
            beacon: entry.beacon_id.to_string(),
            last_seen_utc: millis_to_rfc3339(entry.last_seen_at),
            pairing_id: entry.pairing_id,
            accumulated_pause_ms: entry.accumulated_pause_ms,
        }
    }
}

/// Presence listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PresenceResponse {
    /// Beacons in range.
    pub beacons: Vec<PresentBeacon>,

    /// Number of beacons in range.
    #[schema(example = 1)]
    pub count: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// List beacons in range.
#[utoipa::path(
    get,
    path = "/api/presence",
    tag = "presence",
    operation_id = "getPresence",
    summary = "List beacons in range",
    description = "Returns every beacon with an open dwell, i.e. an entry event \
        was emitted and the matching exit has not fired yet.",
    responses(
        (status = 200, description = "Presence listed", body = PresenceResponse)
    )
)]
pub async fn get_presence(State(state): State<SharedState>) -> Json<PresenceResponse> {
    let beacons: Vec<PresentBeacon> = state
        .orchestrator
        .presence()
        .into_iter()
        .map(PresentBeacon::from)
        .collect();
    let count = beacons.len();
    Json(PresenceResponse { beacons, count })
}

/// Forget every beacon in range.
#[utoipa::path(
    delete,
    path = "/api/presence",
    tag = "presence",
    operation_id = "clearPresence",
    summary = "Forget beacons in range",
    description = "Drops all open dwells without emitting exit events. Beacons \
        still in range are reported as new entries on their next sighting.",
    responses(
        (status = 204, description = "Presence cleared"),
        (status = 503, description = "Pipeline has shut down", body = ErrorResponse)
    )
)]
pub async fn clear_presence(State(state): State<SharedState>) -> ApiResult<StatusCode> {
    state.orchestrator.clear_presence()?;
    Ok(StatusCode::NO_CONTENT)
}
