//! Backend transport contract.
//!
//! The pipeline talks to the campaign backend through four calls: resolve a
//! scan event into action descriptors, upload a history batch, fetch the
//! proximity-UUID layout and fetch backend-managed settings. [`HttpTransport`]
//! implements them over JSON/HTTP.

use async_trait::async_trait;
use thiserror::Error;

use crate::settings::SettingsUpdate;
use crate::types::{ActionDescriptor, HistoryBatch, ScanEvent};

/// Transport-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established or was reset.
    #[error("network error: {0}")]
    Network(String),

    /// No answer within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The backend answered with a 5xx status.
    #[error("server error (status {status})")]
    Server {
        /// HTTP status.
        status: u16,
    },

    /// The body could not be decoded.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// The API key was refused.
    #[error("unauthorized")]
    Unauthorized,

    /// The backend refused the request itself.
    #[error("rejected (status {status}): {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Backend-provided reason.
        message: String,
    },
}

impl TransportError {
    /// Whether repeating the request later may succeed.
    #[inline]
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Server { .. } | Self::MalformedBody(_)
        )
    }
}

/// Result alias for transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Backend calls used by the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask the backend which actions apply to `event`.
    ///
    /// An empty list is a valid answer.
    async fn resolve(&self, event: &ScanEvent) -> TransportResult<Vec<ActionDescriptor>>;

    /// Upload one history batch. `Ok` means the backend acknowledged receipt.
    async fn upload_history(&self, batch: &HistoryBatch) -> TransportResult<()>;

    /// Fetch the proximity UUIDs of interest. An empty list means "all".
    async fn fetch_layout(&self) -> TransportResult<Vec<String>>;

    /// Fetch settings newer than `revision`.
    ///
    /// Backends without managed settings keep the default, which always
    /// answers [`SettingsUpdate::Unchanged`].
    async fn fetch_settings(&self, revision: Option<u64>) -> TransportResult<SettingsUpdate> {
        let _ = revision;
        Ok(SettingsUpdate::Unchanged)
    }
}

#[cfg(feature = "http-transport")]
pub use http::HttpTransport;

#[cfg(feature = "http-transport")]
mod http {
    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::{Response, StatusCode};
    use serde::{Deserialize, Serialize};
    use url::Url;

    use super::{Transport, TransportError, TransportResult};
    use crate::config::BackendConfig;
    use crate::error::{Result, SightlineError};
    use crate::settings::{RemoteSettings, SettingsUpdate};
    use crate::types::{ActionDescriptor, HistoryBatch, ScanEvent};

    const API_KEY_HEADER: &str = "X-Api-Key";

    #[derive(Serialize)]
    struct ResolveRequest<'a> {
        pid: String,
        event: &'a ScanEvent,
    }

    #[derive(Deserialize)]
    struct ResolveResponse {
        #[serde(default)]
        actions: Vec<ActionDescriptor>,
    }

    #[derive(Deserialize)]
    struct LayoutResponse {
        #[serde(default)]
        proximity_uuids: Vec<String>,
    }

    /// JSON over HTTP transport.
    #[derive(Clone)]
    pub struct HttpTransport {
        client: reqwest::Client,
        base_url: Url,
    }

    impl HttpTransport {
        /// Build a client for the configured backend.
        ///
        /// # Errors
        ///
        /// Returns a configuration error for an unparsable base URL or an API
        /// key that is not a valid header value.
        pub fn new(config: &BackendConfig) -> Result<Self> {
            let base_url = Url::parse(&config.base_url).map_err(|e| {
                SightlineError::ConfigValidationError(format!("backend.base_url: {e}"))
            })?;

            let mut headers = HeaderMap::new();
            if let Some(key) = &config.api_key {
                let value = HeaderValue::from_str(key).map_err(|e| {
                    SightlineError::ConfigValidationError(format!("backend.api_key: {e}"))
                })?;
                headers.insert(API_KEY_HEADER, value);
            }

            let client = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .default_headers(headers)
                .build()
                .map_err(|e| SightlineError::NetworkError(e.to_string()))?;

            Ok(Self { client, base_url })
        }

        fn endpoint(&self, path: &str) -> TransportResult<Url> {
            self.base_url
                .join(path)
                .map_err(|e| TransportError::Network(format!("invalid endpoint '{path}': {e}")))
        }
    }

    fn map_send_error(err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::MalformedBody(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }

    async fn check_status(response: Response) -> TransportResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(TransportError::Server {
                status: status.as_u16(),
            });
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn resolve(&self, event: &ScanEvent) -> TransportResult<Vec<ActionDescriptor>> {
            let url = self.endpoint("api/v1/resolve")?;
            let body = ResolveRequest {
                pid: event.beacon_id.pid(),
                event,
            };
            let response = self
                .client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(|e| map_send_error(&e))?;
            let response = check_status(response).await?;
            let parsed: ResolveResponse = response
                .json()
                .await
                .map_err(|e| TransportError::MalformedBody(e.to_string()))?;
            Ok(parsed.actions)
        }

        async fn upload_history(&self, batch: &HistoryBatch) -> TransportResult<()> {
            let url = self.endpoint("api/v1/history")?;
            let response = self
                .client
                .post(url)
                .json(batch)
                .send()
                .await
                .map_err(|e| map_send_error(&e))?;
            check_status(response).await?;
            Ok(())
        }

        async fn fetch_layout(&self) -> TransportResult<Vec<String>> {
            let url = self.endpoint("api/v1/layout")?;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| map_send_error(&e))?;
            let response = check_status(response).await?;
            let parsed: LayoutResponse = response
                .json()
                .await
                .map_err(|e| TransportError::MalformedBody(e.to_string()))?;
            Ok(parsed.proximity_uuids)
        }

        async fn fetch_settings(&self, revision: Option<u64>) -> TransportResult<SettingsUpdate> {
            let url = self.endpoint("api/v1/settings")?;
            let mut request = self.client.get(url);
            if let Some(revision) = revision {
                request = request.query(&[("revision", revision)]);
            }
            let response = request.send().await.map_err(|e| map_send_error(&e))?;
            match response.status() {
                StatusCode::NOT_MODIFIED => return Ok(SettingsUpdate::Unchanged),
                StatusCode::NO_CONTENT => return Ok(SettingsUpdate::Reset),
                _ => {}
            }
            let response = check_status(response).await?;
            let parsed: RemoteSettings = response
                .json()
                .await
                .map_err(|e| TransportError::MalformedBody(e.to_string()))?;
            Ok(SettingsUpdate::Changed(parsed))
        }
    }

}
