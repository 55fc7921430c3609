//! OpenAPI specification generation for the sightline agent API.
//!
//! The document is served at `/api/openapi.json`, rendered by Swagger UI at
//! `/swagger-ui`, and written to disk by the `gen-openapi` binary for client
//! generation.

use axum::Json;
use sightline_core::{ConversionKind, HistoryCounts, ScannerState, SettingsPatch};
use utoipa::OpenApi;

use super::actions::{
    ActionsResponse, ConversionRequest, ConversionResponse, DeliveredAction,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::history::{FlushResponse, HistoryResponse};
use super::presence::{PresenceResponse, PresentBeacon};
use super::scanner::{LifecycleResponse, ScannerStatusResponse};
use super::settings::{SettingsRefreshResponse, SettingsResponse};
use super::sightings::{SightingRequest, SightingResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for sightline.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "sightline API",
        version = "0.1.0",
        description = r#"
# sightline API

sightline turns beacon sightings into entry and exit events, asks the campaign
backend which actions those events trigger, and hands the actions to the host.

## Flow

1. A platform scanner posts sightings to **postSighting** while the radio is on.
2. The first sighting of a beacon emits an entry; a beacon unseen for the exit
   timeout (radio-off time excluded) emits an exit.
3. Each event is resolved against the backend; matching actions pass the
   suppression rules and are delivered now or at their scheduled time.
4. The host polls **getActions**, presents them, and reports the outcome with
   **postConversion**.

History (scans, presented actions, conversions) is uploaded periodically and on
lifecycle changes; **flushHistory** uploads immediately.

The backend can override scan timings, filters, retries and upload intervals.
New revisions are polled periodically; **refreshSettings** polls now.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local sightline agent")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "presence", description = "Sighting ingestion and beacons in range"),
        (name = "scanner", description = "Duty cycle control and host lifecycle"),
        (name = "actions", description = "Delivered actions and conversion feedback"),
        (name = "history", description = "History buffering and upload"),
        (name = "settings", description = "Backend-managed settings")
    ),
    paths(
        super::health::health_check,
        super::presence::get_presence,
        super::presence::clear_presence,
        super::sightings::post_sighting,
        super::scanner::get_scanner,
        super::scanner::start_scanner,
        super::scanner::stop_scanner,
        super::scanner::enter_foreground,
        super::scanner::enter_background,
        super::actions::get_actions,
        super::actions::post_conversion,
        super::history::get_history,
        super::history::flush_history,
        super::history::purge_history,
        super::settings::get_settings,
        super::settings::refresh_settings,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            PresentBeacon,
            PresenceResponse,
            SightingRequest,
            SightingResponse,
            ScannerState,
            ScannerStatusResponse,
            LifecycleResponse,
            DeliveredAction,
            ActionsResponse,
            ConversionKind,
            ConversionRequest,
            ConversionResponse,
            HistoryCounts,
            HistoryResponse,
            FlushResponse,
            SettingsPatch,
            SettingsResponse,
            SettingsRefreshResponse,
        )
    )
)]
pub struct ApiDoc;
