//! Host lifecycle events.
//!
//! The host networking layer reports three independent callbacks per logical
//! request. None of them carries a transaction id; the url and the initiation
//! timestamp are repeated on each.

use crate::body::BodyDescriptor;
use crate::record::{Header, HostTimestamp, RequestKind};
use serde::{Deserialize, Serialize};

/// Resource type classification supplied by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Top-level document navigation
    MainFrame,
    /// Nested frame document
    SubFrame,
    /// Programmatic call (XHR / fetch)
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    /// Script loaded as a resource
    Script,
    /// Stylesheet
    Stylesheet,
    /// Image
    Image,
    /// Font
    Font,
    /// Audio / video
    Media,
    /// Websocket handshake
    Websocket,
    /// Anything else the host may report
    #[serde(other)]
    Other,
}

impl ResourceType {
    /// Record kind for observed resource types, `None` for everything else
    #[must_use]
    pub const fn capture_kind(self) -> Option<RequestKind> {
        match self {
            Self::MainFrame => Some(RequestKind::DocumentLoad),
            Self::XmlHttpRequest => Some(RequestKind::ScriptCall),
            _ => None,
        }
    }
}

/// Fields every lifecycle event shares.
pub trait LifecycleEvent {
    /// Exact request url
    fn url(&self) -> &str;
    /// Initiation time, repeated by the host on every callback
    fn timestamp(&self) -> HostTimestamp;
    /// Host classification
    fn resource_type(&self) -> ResourceType;
}

/// A request is about to be sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInitiated {
    /// Exact request url
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Initiation time
    pub timestamp: HostTimestamp,
    /// Host classification
    pub resource_type: ResourceType,
    /// Body description, if the request has one
    #[serde(default)]
    pub request_body: Option<BodyDescriptor>,
}

/// Request headers are final.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeadersReady {
    /// Exact request url
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Initiation time
    pub timestamp: HostTimestamp,
    /// Host classification
    pub resource_type: ResourceType,
    /// Outgoing headers, in order
    #[serde(default)]
    pub request_headers: Vec<Header>,
}

/// Response status and headers arrived.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHeadersReceived {
    /// Exact request url
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Initiation time
    pub timestamp: HostTimestamp,
    /// Host classification
    pub resource_type: ResourceType,
    /// Response status code
    pub status_code: u16,
    /// Response headers, in order
    #[serde(default)]
    pub response_headers: Vec<Header>,
}

macro_rules! impl_lifecycle_event {
    ($($ty:ty),+) => {
        $(
            impl LifecycleEvent for $ty {
                fn url(&self) -> &str {
                    &self.url
                }

                fn timestamp(&self) -> HostTimestamp {
                    self.timestamp
                }

                fn resource_type(&self) -> ResourceType {
                    self.resource_type
                }
            }
        )+
    };
}

impl_lifecycle_event!(RequestInitiated, RequestHeadersReady, ResponseHeadersReceived);

/// Answer returned to the host for every lifecycle event.
///
/// Capture is observe-only: the network operation is never blocked or altered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostDirective {
    /// Let the operation continue untouched
    #[default]
    Proceed,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;

    #[test]
    fn only_documents_and_script_calls_are_observed() {
        assert_eq!(
            ResourceType::MainFrame.capture_kind(),
            Some(RequestKind::DocumentLoad)
        );
        assert_eq!(
            ResourceType::XmlHttpRequest.capture_kind(),
            Some(RequestKind::ScriptCall)
        );
        for ignored in [
            ResourceType::SubFrame,
            ResourceType::Script,
            ResourceType::Stylesheet,
            ResourceType::Image,
            ResourceType::Font,
            ResourceType::Media,
            ResourceType::Websocket,
            ResourceType::Other,
        ] {
            assert_eq!(ignored.capture_kind(), None, "{ignored:?}");
        }
    }

    #[test]
    fn unknown_resource_type_deserializes_as_other() {
        let parsed: ResourceType =
            serde_json::from_str("\"csp_report\"").unwrap_or(ResourceType::MainFrame);
        assert_eq!(parsed, ResourceType::Other);
    }

    #[test]
    fn initiated_event_reads_host_json() {
        let event: RequestInitiated = serde_json::from_str(
            r#"{"url":"https://a.test/x","method":"GET","timestamp":1000.0,"resourceType":"xmlhttprequest"}"#,
        )
        .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(event.resource_type, ResourceType::XmlHttpRequest);
        assert_eq!(event.timestamp(), HostTimestamp::from_millis(1000.0));
        assert!(event.request_body.is_none());
    }
}
