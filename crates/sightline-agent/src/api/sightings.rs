//! Sighting ingestion.
//!
//! The agent has no radio of its own: a platform scanner process posts raw
//! beacon sightings here and they are forwarded to the bridge radio. While the
//! scanner is paused or stopped the radio is off and sightings are dropped,
//! exactly as a real radio would not report them.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sightline_core::{BeaconId, Sighting};
use tracing::trace;
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the sightings router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(post_sighting))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// One advertisement received by the platform radio.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "beacon": "f7826da6-4fa2-4e98-8024-bc5b71e0893e:42:7",
    "rssi": -63,
    "calibrated_rssi": -59,
    "address": "C3:11:AA:00:00:01"
}))]
pub struct SightingRequest {
    /// Beacon identifier: `uuid:major:minor`, 40 hex characters or `geofence:<id>`.
    #[schema(example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e:42:7")]
    pub beacon: String,

    /// Observed signal strength in dBm.
    #[schema(example = -63)]
    pub rssi: i16,

    /// Advertised signal strength at one metre.
    #[schema(example = -59)]
    pub calibrated_rssi: i16,

    /// Hardware address of the advertiser.
    #[serde(default)]
    pub address: Option<String>,
}

/// Whether the sighting reached the scanner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "accepted": true }))]
pub struct SightingResponse {
    /// `false` while the radio is off (scanner paused or stopped).
    #[schema(example = true)]
    pub accepted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Report a beacon sighting.
#[utoipa::path(
    post,
    path = "/api/sightings",
    tag = "presence",
    operation_id = "postSighting",
    summary = "Report a beacon sighting",
    description = "Forwards one advertisement to the scanner. Sightings arriving \
        while the radio is off are dropped and reported as not accepted.",
    request_body = SightingRequest,
    responses(
        (status = 200, description = "Sighting processed", body = SightingResponse),
        (status = 400, description = "Invalid beacon identifier", body = ErrorResponse)
    )
)]
pub async fn post_sighting(
    State(state): State<SharedState>,
    Json(request): Json<SightingRequest>,
) -> ApiResult<Json<SightingResponse>> {
    let beacon_id: BeaconId = request.beacon.parse()?;
    let accepted = state.feed.push(Sighting {
        beacon_id,
        rssi: request.rssi,
        calibrated_rssi: request.calibrated_rssi,
        address: request.address,
        raw: Vec::new(),
    });
    if !accepted {
        trace!(beacon = %request.beacon, "Sighting dropped, radio is off");
    }
    Ok(Json(SightingResponse { accepted }))
}
