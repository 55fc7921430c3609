//! Unified error types for the sightline core library.
//!
//! This module provides a unified error type [`SightlineError`] that covers all failure
//! modes across the sightline pipeline. Each module also has its own specific error types
//! (`ConfigError`, `TransportError`, `RadioError`) for internal use.
//!
//! # Taxonomy
//!
//! - **Transient-recoverable**: network trouble, 5xx responses, a busy radio. Retried
//!   per policy, logged at debug level, never surfaced to the host application.
//! - **Permanent-input**: a malformed beacon identifier or a rejected credential. Logged
//!   at error level; the single event is abandoned.
//! - **Persistence**: unreadable or unwritable durable state. Loaders degrade to an
//!   empty state instead of failing.
//!
//! # Example
//!
//! ```rust
//! use sightline_core::error::{SightlineError, Result};
//!
//! fn parse_major(raw: &str) -> Result<u16> {
//!     raw.parse()
//!         .map_err(|_| SightlineError::InvalidBeaconId(raw.to_string()))
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all sightline operations.
#[derive(Debug, Error)]
pub enum SightlineError {
    // =========================================================================
    // BEACON ERRORS
    // =========================================================================
    /// A beacon identifier could not be parsed.
    #[error("Invalid beacon identifier: '{0}'. Expected 'uuid:major:minor', 40 hex characters or 'geofence:<id>'.")]
    InvalidBeaconId(String),

    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// The radio rejected a start/stop request because it is busy.
    #[error("Radio is busy: {0}")]
    RadioBusy(String),

    /// The radio primitive reported a platform failure.
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// The backend could not be reached.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The backend did not answer within the configured timeout.
    #[error("Backend request timed out")]
    Timeout,

    /// The backend answered with a 5xx status.
    #[error("Backend server error (status {status})")]
    ServerError {
        /// HTTP status returned by the backend.
        status: u16,
    },

    /// The backend answered with a body that could not be decoded.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// The backend rejected the configured API credential.
    #[error("Backend rejected the API key. Check `backend.api_key` in the configuration.")]
    Unauthorized,

    /// The backend rejected the request itself.
    #[error("Backend rejected the request (status {status}): {message}")]
    RequestRejected {
        /// HTTP status returned by the backend.
        status: u16,
        /// Backend-provided reason, if any.
        message: String,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A stored record exists but could not be decoded.
    #[error("Corrupt record '{key}': {message}")]
    CorruptRecord {
        /// Durable store key of the record.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // =========================================================================
    // LIFECYCLE ERRORS
    // =========================================================================
    /// A component's mailbox is closed because it was shut down.
    #[error("The {0} has been shut down")]
    ComponentStopped(&'static str),
}

/// A specialized [`Result`] type for sightline operations.
pub type Result<T> = std::result::Result<T, SightlineError>;

impl SightlineError {
    /// Returns `true` if retrying the same operation later may succeed.
    #[inline]
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RadioBusy(_)
                | Self::RadioUnavailable(_)
                | Self::NetworkError(_)
                | Self::Timeout
                | Self::ServerError { .. }
                | Self::MalformedResponse(_)
        )
    }

    /// Returns `true` if the failure is caused by the input itself and retrying is pointless.
    #[inline]
    #[must_use]
    pub const fn is_permanent_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidBeaconId(_) | Self::Unauthorized | Self::RequestRejected { .. }
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_) | Self::CorruptRecord { .. } | Self::IoError(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidBeaconId(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 424 Failed Dependency - backend refuses our credential or request
            Self::Unauthorized | Self::RequestRejected { .. } => 424,

            // 500 Internal Server Error - local state issues
            Self::PersistenceError(_) | Self::CorruptRecord { .. } | Self::IoError(_) => 500,

            // 502 Bad Gateway - backend misbehaved
            Self::ServerError { .. } | Self::MalformedResponse(_) => 502,

            // 503 Service Unavailable - radio, network or a stopped component
            Self::RadioBusy(_)
            | Self::RadioUnavailable(_)
            | Self::NetworkError(_)
            | Self::ComponentStopped(_) => 503,

            // 504 Gateway Timeout
            Self::Timeout => 504,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBeaconId(_) => "INVALID_BEACON_ID",
            Self::RadioBusy(_) => "RADIO_BUSY",
            Self::RadioUnavailable(_) => "RADIO_UNAVAILABLE",
            Self::NetworkError(_) => "NETWORK_ERROR",
            Self::Timeout => "BACKEND_TIMEOUT",
            Self::ServerError { .. } => "BACKEND_SERVER_ERROR",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RequestRejected { .. } => "REQUEST_REJECTED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::CorruptRecord { .. } => "CORRUPT_RECORD",
            Self::IoError(_) => "IO_ERROR",
            Self::ComponentStopped(_) => "COMPONENT_STOPPED",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for SightlineError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {source}", path.display()))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::transport::TransportError> for SightlineError {
    fn from(err: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError;
        match err {
            TransportError::Network(message) => Self::NetworkError(message),
            TransportError::Timeout => Self::Timeout,
            TransportError::Server { status } => Self::ServerError { status },
            TransportError::MalformedBody(message) => Self::MalformedResponse(message),
            TransportError::Unauthorized => Self::Unauthorized,
            TransportError::Rejected { status, message } => {
                Self::RequestRejected { status, message }
            }
        }
    }
}

impl From<crate::radio::RadioError> for SightlineError {
    fn from(err: crate::radio::RadioError) -> Self {
        use crate::radio::RadioError;
        match err {
            RadioError::Busy => Self::RadioBusy("scan already in progress".into()),
            RadioError::Platform { code, message } => {
                Self::RadioUnavailable(format!("code {code}: {message}"))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
