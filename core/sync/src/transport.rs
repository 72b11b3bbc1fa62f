//! Transport seam: executing one batched query per round.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;
use url::Url;

use geosync_common::{Error, Result};

use crate::config::GeoSyncConfig;
use crate::query::BatchedQuery;

/// Longest server message kept in an [`TransportOutcome::ApplicationError`].
const MAX_REASON_LEN: usize = 512;

/// Outcome of executing one batched query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    /// No response reached us (DNS, connect, TLS, timeout, reset).
    ConnectionFailure(String),
    /// The server answered with a non-success status.
    ApplicationError { status: u16, reason: String },
    /// The server answered with a success status and this body.
    Success(Bytes),
}

/// Executes batched queries against the remote service.
///
/// Implementations own request construction, authentication and timeouts,
/// and must resolve timeouts to [`TransportOutcome::ConnectionFailure`]
/// rather than hang.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one round's batched query.
    async fn execute(&self, query: &BatchedQuery) -> TransportOutcome;
}

/// Map an HTTP status and body to a transport outcome.
pub fn classify_http(status: u16, body: Bytes) -> TransportOutcome {
    if (200..300).contains(&status) {
        return TransportOutcome::Success(body);
    }
    let mut reason = String::from_utf8_lossy(&body).trim().to_string();
    if reason.len() > MAX_REASON_LEN {
        let mut cut = MAX_REASON_LEN;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
    }
    TransportOutcome::ApplicationError { status, reason }
}

/// GraphQL-over-HTTP transport.
pub struct HttpTransport {
    http: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    /// Create a transport posting to `endpoint`.
    ///
    /// # Errors
    /// - The HTTP client cannot be built
    pub fn new(endpoint: Url, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("GeoSync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    /// Create a transport from the loaded configuration.
    pub fn from_config(config: &GeoSyncConfig) -> Result<Self> {
        let endpoint = config.endpoint_url()?;
        Self::new(endpoint, config.api_key.clone(), config.request_timeout)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, query: &BatchedQuery) -> TransportOutcome {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(header::ACCEPT, "application/json")
            .json(&query.to_body());
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        debug!("Posting {} sub-queries to {}", query.aliases().len(), self.endpoint);
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return TransportOutcome::ConnectionFailure(e.to_string()),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => classify_http(status, body),
            Err(e) => TransportOutcome::ConnectionFailure(format!(
                "Failed to read response body: {}",
                e
            )),
        }
    }
}
