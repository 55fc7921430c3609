//! API error types and response handling.
//!
//! Every handler returns [`ApiResult`]; core errors convert into [`ApiError`]
//! using the status classification of [`SightlineError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use sightline_core::SightlineError;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - The request contradicts recorded state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 424 Failed Dependency - The backend refused our credential or request.
    #[error("Failed Dependency: {message}")]
    FailedDependency {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    #[error("Internal Error: {message}")]
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 502/504 - The backend misbehaved or did not answer in time.
    #[error("Upstream Error: {message}")]
    Upstream {
        /// Status to answer with.
        status: u16,
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - Radio, network or a stopped pipeline.
    #[error("Service Unavailable: {message}")]
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "INVALID_BEACON_ID",
    "message": "Invalid beacon identifier: 'lobby'",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "INVALID_BEACON_ID").
    #[schema(example = "INVALID_BEACON_ID")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Invalid beacon identifier: 'lobby'")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (StatusCode::BAD_REQUEST, error_code, message),
            Self::Conflict {
                error_code,
                message,
            } => (StatusCode::CONFLICT, error_code, message),
            Self::FailedDependency {
                error_code,
                message,
            } => (StatusCode::FAILED_DEPENDENCY, error_code, message),
            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(error_code = %error_code, message = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_code, message)
            }
            Self::Upstream {
                status,
                error_code,
                message,
            } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                error_code,
                message,
            ),
            Self::ServiceUnavailable {
                error_code,
                message,
            } => (StatusCode::SERVICE_UNAVAILABLE, error_code, message),
        };

        let body = ErrorResponse {
            error: error_code,
            message,
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Convert from sightline_core errors.
impl From<SightlineError> for ApiError {
    fn from(err: SightlineError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();
        match err.http_status_code() {
            400 | 404 | 422 => Self::BadRequest {
                error_code,
                message,
            },
            424 => Self::FailedDependency {
                error_code,
                message,
            },
            status @ (502 | 504) => Self::Upstream {
                status,
                error_code,
                message,
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
            },
            _ => Self::InternalError {
                error_code,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_core_error_mapping() {
        let status = |err: SightlineError| ApiError::from(err).into_response().status();
        assert_eq!(
            status(SightlineError::InvalidBeaconId("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(SightlineError::Unauthorized), StatusCode::FAILED_DEPENDENCY);
        assert_eq!(status(SightlineError::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status(SightlineError::ServerError { status: 500 }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(SightlineError::ComponentStopped("scanner")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(SightlineError::PersistenceError("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code_is_preserved() {
        match ApiError::from(SightlineError::Timeout) {
            ApiError::Upstream { error_code, .. } => assert_eq!(error_code, "BACKEND_TIMEOUT"),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
