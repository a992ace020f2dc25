//! Newline-delimited JSON protocol between the host and a capture session.
//!
//! Every input line is one [`Envelope`]: a [`HostMessage`] plus an optional
//! `seq` the host uses to match the reply. Every input line gets exactly one
//! reply line carrying the same `seq`. Notifications are written as separate
//! lines without a `seq`, whenever the session publishes them.
//!
//! ```text
//! > {"seq":1,"type":"setInterceptEnabled","enabled":true}
//! < {"seq":1,"type":"ack"}
//! > {"seq":2,"type":"requestInitiated","url":"https://a.test/x","method":"GET","timestamp":1000.0,"resourceType":"xmlhttprequest"}
//! < {"notification":"recordAppended","record":{...}}
//! < {"seq":2,"type":"directive","directive":"proceed"}
//! ```

use repeater_capture::{
    CaptureSession, HostDirective, Notification, RecordId, ReplayRequest, RequestHeadersReady,
    RequestInitiated, RequestRecord, ResponseHeadersReceived, SessionError, SessionSnapshot,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol failures.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// An input line is not a valid message
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Reading input or writing output failed
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One input line.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    /// Echoed on the reply
    #[serde(default)]
    pub seq: Option<u64>,
    /// The message itself
    #[serde(flatten)]
    pub message: HostMessage,
}

/// Messages the host sends.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    /// Lifecycle: a request is about to be sent
    RequestInitiated(RequestInitiated),
    /// Lifecycle: outgoing headers are final
    RequestHeadersReady(RequestHeadersReady),
    /// Lifecycle: response status and headers arrived
    ResponseHeadersReceived(ResponseHeadersReceived),
    /// Enabled flag plus full history
    GetState,
    /// Toggle capture
    SetInterceptEnabled {
        /// New flag
        enabled: bool,
    },
    /// One record by id
    GetRecord {
        /// Record id
        id: RecordId,
    },
    /// Resend an edited copy of a record
    #[serde(rename_all = "camelCase")]
    ModifyAndResend {
        /// Record being replayed
        source_id: RecordId,
        /// Edited descriptor
        request: ReplayRequest,
    },
    /// Drop every record
    ClearHistory,
    /// Records matching a url or method substring
    FilterHistory {
        /// Case-insensitive needle
        query: String,
    },
}

/// Reply to one message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostReply {
    /// Answer to a lifecycle message
    Directive {
        /// Always `proceed`
        directive: HostDirective,
    },
    /// Answer to `getState`
    State(SessionSnapshot),
    /// Command accepted
    Ack,
    /// Answer to `getRecord`
    Record {
        /// The record
        record: Box<RequestRecord>,
    },
    /// Unknown, evicted or cleared record
    NotFound {
        /// Requested id
        id: RecordId,
    },
    /// Replay accepted; the outcome follows as notifications
    ReplayStarted {
        /// Record created for the replay
        id: RecordId,
    },
    /// Answer to `filterHistory`
    Records {
        /// Matching records, newest first
        records: Vec<RequestRecord>,
    },
    /// The message could not be handled
    Error {
        /// Description
        message: String,
    },
}

/// One output line.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputLine {
    /// Reply to an input line
    Reply {
        /// Echo of the input `seq`
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        /// The reply
        #[serde(flatten)]
        reply: HostReply,
    },
    /// Pushed notification
    Notification(Notification),
}

impl OutputLine {
    /// Serialize as one line, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if serialization fails.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse one input line.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for anything that is not an
/// [`Envelope`].
pub fn parse_line(line: &str) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

fn session_error(error: SessionError) -> HostReply {
    match error {
        SessionError::RecordNotFound(id) => HostReply::NotFound { id },
        other => HostReply::Error {
            message: other.to_string(),
        },
    }
}

/// Handle one message against the session.
pub async fn dispatch(session: &CaptureSession, message: HostMessage) -> HostReply {
    match message {
        HostMessage::RequestInitiated(event) => HostReply::Directive {
            directive: session.request_initiated(event).await,
        },
        HostMessage::RequestHeadersReady(event) => HostReply::Directive {
            directive: session.request_headers_ready(event).await,
        },
        HostMessage::ResponseHeadersReceived(event) => HostReply::Directive {
            directive: session.response_headers_received(event).await,
        },
        HostMessage::GetState => HostReply::State(session.snapshot().await),
        HostMessage::SetInterceptEnabled { enabled } => {
            match session.set_intercept_enabled(enabled).await {
                Ok(_) => HostReply::Ack,
                Err(error) => session_error(error),
            }
        },
        HostMessage::GetRecord { id } => match session.record(id).await {
            Ok(record) => HostReply::Record {
                record: Box::new(record),
            },
            Err(error) => session_error(error),
        },
        HostMessage::ModifyAndResend { source_id, request } => {
            match session
                .modify_and_resend(source_id, request.without_blank_headers())
                .await
            {
                Ok(started) => HostReply::ReplayStarted { id: started.id },
                Err(error) => session_error(error),
            }
        },
        HostMessage::ClearHistory => match session.clear_history().await {
            Ok(()) => HostReply::Ack,
            Err(error) => session_error(error),
        },
        HostMessage::FilterHistory { query } => HostReply::Records {
            records: session.filter(&query).await,
        },
    }
}
