//! Delivered actions and conversion feedback.
//!
//! The host polls `GET /api/actions` for actions to present, then reports what
//! happened to each instance through `POST /api/conversions`.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sightline_core::{ActionKind, ConversionKind, ResolvedAction};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::api::millis_to_rfc3339;
use crate::state::{SharedState, RECENT_ACTIONS_CAPACITY};

/// Creates the actions router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_actions))
}

/// Creates the conversions router.
pub fn conversions_router() -> Router<SharedState> {
    Router::new().route("/", post(post_conversion))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for the action listing.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ActionsQuery {
    /// Maximum number of actions to return, newest kept. Defaults to all buffered.
    #[param(example = 10, minimum = 1)]
    pub limit: Option<usize>,
}

/// An action handed to the host.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "action_uuid": "3f8f6e0a-6b7d-4d3b-9a53-0a3d2f1c9b11",
    "instance_uuid": "c1d7a2f0-2b44-4c1a-8c55-5d2e1b3f7a90",
    "kind": "website",
    "subject": "Welcome",
    "body": "Today's offers",
    "target": "https://example.com/offers",
    "payload": null,
    "beacon": "f7826da6-4fa2-4e98-8024-bc5b71e0893e:42:7",
    "is_entry": true,
    "resolved_at_utc": "2025-01-15T09:30:00+00:00"
}))]
pub struct DeliveredAction {
    /// Logical action identity.
    pub action_uuid: Uuid,

    /// Identity of this delivery; quote it when reporting conversions.
    pub instance_uuid: Uuid,

    /// Action kind.
    #[schema(example = "website")]
    pub kind: String,

    /// Notification title.
    pub subject: Option<String>,

    /// Notification text.
    pub body: Option<String>,

    /// URI or URL to open, for kinds that have one.
    pub target: Option<String>,

    /// Opaque campaign payload.
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,

    /// Beacon that triggered the action.
    pub beacon: String,

    /// Whether an entry (rather than an exit) triggered the action.
    pub is_entry: bool,

    /// When the backend resolved the action.
    pub resolved_at_utc: String,
}

impl From<ResolvedAction> for DeliveredAction {
    fn from(action: ResolvedAction) -> Self {
        let kind = action.content.name().to_string();
        let (subject, body, target) = match action.content {
            ActionKind::Message { subject, body } => (subject, body, None),
            ActionKind::Uri { subject, body, uri } => (subject, body, Some(uri)),
            ActionKind::Website { subject, body, url } | ActionKind::InApp { subject, body, url } => {
                (subject, body, Some(url))
            }
            ActionKind::Silent => (None, None, None),
        };
        Self {
            action_uuid: action.uuid,
            instance_uuid: action.instance_uuid,
            kind,
            subject,
            body,
            target,
            payload: action.payload,
            beacon: action.beacon_id.to_string(),
            is_entry: action.is_entry,
            resolved_at_utc: millis_to_rfc3339(action.resolved_at),
        }
    }
}

/// Delivered action listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActionsResponse {
    /// Actions, oldest first.
    pub actions: Vec<DeliveredAction>,
}

/// Conversion report for one delivered instance.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "instance_uuid": "c1d7a2f0-2b44-4c1a-8c55-5d2e1b3f7a90",
    "kind": "shown"
}))]
pub struct ConversionRequest {
    /// Instance the report refers to.
    pub instance_uuid: Uuid,

    /// New status. Statuses only move up: `notification_disabled` <
    /// `suppressed` < `shown` < `success`.
    pub kind: ConversionKind,
}

/// Conversion acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "recorded": true }))]
pub struct ConversionResponse {
    /// Whether the report was recorded.
    #[schema(example = true)]
    pub recorded: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// List recently delivered actions.
#[utoipa::path(
    get,
    path = "/api/actions",
    tag = "actions",
    operation_id = "getActions",
    summary = "List delivered actions",
    description = "Returns the most recent actions handed to the host, oldest first. \
        Silent actions are never listed.",
    params(ActionsQuery),
    responses(
        (status = 200, description = "Actions listed", body = ActionsResponse),
        (status = 400, description = "Invalid limit", body = ErrorResponse)
    )
)]
pub async fn get_actions(
    State(state): State<SharedState>,
    Query(query): Query<ActionsQuery>,
) -> ApiResult<Json<ActionsResponse>> {
    let limit = query.limit.unwrap_or(RECENT_ACTIONS_CAPACITY);
    if limit == 0 {
        return Err(ApiError::BadRequest {
            error_code: "invalid_limit".to_string(),
            message: "limit must be at least 1".to_string(),
        });
    }
    let actions = state
        .inbox
        .latest(limit)
        .into_iter()
        .map(DeliveredAction::from)
        .collect();
    Ok(Json(ActionsResponse { actions }))
}

/// Report a conversion status.
#[utoipa::path(
    post,
    path = "/api/conversions",
    tag = "actions",
    operation_id = "postConversion",
    summary = "Report a conversion",
    description = "Records what happened to a delivered action instance. A status \
        lower than the one already recorded is rejected.",
    request_body = ConversionRequest,
    responses(
        (status = 200, description = "Conversion recorded", body = ConversionResponse),
        (status = 409, description = "Status would downgrade the recorded one", body = ErrorResponse)
    )
)]
pub async fn post_conversion(
    State(state): State<SharedState>,
    Json(request): Json<ConversionRequest>,
) -> ApiResult<Json<ConversionResponse>> {
    if !state
        .orchestrator
        .notify_conversion(request.instance_uuid, request.kind)
    {
        return Err(ApiError::Conflict {
            error_code: "conversion_downgrade".to_string(),
            message: format!(
                "Instance {} already has an equal or higher conversion status",
                request.instance_uuid
            ),
        });
    }
    Ok(Json(ConversionResponse { recorded: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_request_deserialization() {
        let json = r#"{"instance_uuid": "c1d7a2f0-2b44-4c1a-8c55-5d2e1b3f7a90", "kind": "success"}"#;
        let request: ConversionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.kind, ConversionKind::Success);
    }
}
