//! Outbound HTTP transport for replays.
//!
//! The replay engine never validates user input itself; anything the
//! transport refuses (bad method, bad url, bad header) surfaces as a
//! [`TransportError`] and ends the replayed record in `error` status.

use crate::record::Header;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Request exactly as it goes on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Target url
    pub url: String,
    /// HTTP method, sent verbatim
    pub method: String,
    /// Headers in order, duplicates kept
    pub headers: Vec<Header>,
    /// Body; `None` sends no body at all
    pub body: Option<String>,
}

/// Response of a replayed request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    /// Status code
    pub status_code: u16,
    /// Response headers in wire order
    pub headers: Vec<Header>,
    /// Full body, decoded as text
    pub body: String,
}

/// Transport failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The method is not a valid HTTP token
    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    /// The url could not be parsed
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// Offending url
        url: String,
        /// Parser message
        reason: String,
    },

    /// A header name or value was rejected
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader {
        /// Offending header name
        name: String,
        /// Parser message
        reason: String,
    },

    /// DNS, TCP or TLS failure
    #[error("connection failed: {0}")]
    Connect(String),

    /// No response within the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Any other failure while sending
    #[error("request failed: {0}")]
    Request(String),

    /// The response body could not be read
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() {
            Self::Timeout(message)
        } else if error.is_connect() {
            Self::Connect(message)
        } else if error.is_body() || error.is_decode() {
            Self::Body(message)
        } else {
            Self::Request(message)
        }
    }
}

/// Boxed future returned by [`ReplayTransport::execute`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ReplayResponse, TransportError>> + Send + 'a>>;

/// Something that can send an [`OutboundRequest`].
///
/// Uses an explicit boxed future so it can live in the environment as
/// `Arc<dyn ReplayTransport>`.
pub trait ReplayTransport: Send + Sync {
    /// Send the request once. No retries.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] for anything that prevents a complete
    /// response from being read.
    fn execute(&self, request: OutboundRequest) -> TransportFuture<'_>;
}

/// Transport tuning.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    /// `User-Agent` sent unless the request sets its own
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("repeater/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// [`reqwest`] backed transport.
///
/// The client keeps a cookie jar shared by every replay of the session, so
/// cookies set by one replayed response ride along on the next one.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the TLS backend cannot be
    /// initialised.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    fn build(&self, request: OutboundRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::InvalidMethod(request.method.clone()))?;

        let url = reqwest::Url::parse(&request.url).map_err(|e| TransportError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;

        let mut builder = self.client.request(method, url);
        for header in &request.headers {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| {
                TransportError::InvalidHeader {
                    name: header.name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let value = HeaderValue::from_str(&header.value).map_err(|e| {
                TransportError::InvalidHeader {
                    name: header.name.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.header(name, value);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        Ok(builder)
    }
}

impl ReplayTransport for ReqwestTransport {
    fn execute(&self, request: OutboundRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let builder = self.build(request)?;
            let response = builder.send().await?;

            let status_code = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    Header::new(
                        name.as_str(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = response.text().await?;

            Ok(ReplayResponse {
                status_code,
                headers,
                body,
            })
        })
    }
}
