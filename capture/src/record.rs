//! Request record model.
//!
//! A [`RequestRecord`] is one logical HTTP exchange. It is created exactly once
//! (by the capture gate on request initiation, or by the replay engine on a
//! user-triggered resend) and afterwards only mutated in place: headers and
//! status filled by the correlator, response fields filled by the replay engine.

use crate::body::RequestBody;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique, monotonically increasing record identifier.
///
/// Identifiers are never reused for the lifetime of a session, not even after
/// the history is cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Create a record id from its raw value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw numeric value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-supplied event time, in milliseconds since the epoch.
///
/// The host reports initiation time as a floating point millisecond value and
/// repeats the exact same value on the later lifecycle callbacks of the same
/// request. Equality is bitwise so the value can serve as half of a join key.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostTimestamp(f64);

impl HostTimestamp {
    /// Wrap a millisecond value reported by the host
    #[must_use]
    pub const fn from_millis(millis: f64) -> Self {
        Self(millis)
    }

    /// Derive a host timestamp from a wall clock reading
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // millisecond epochs fit in f64's mantissa
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self(time.timestamp_millis() as f64)
    }

    /// Milliseconds since the epoch
    #[must_use]
    pub const fn as_millis(self) -> f64 {
        self.0
    }
}

impl PartialEq for HostTimestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for HostTimestamp {}

/// How a record came into existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// Top-level document navigation
    DocumentLoad,
    /// Programmatic call (XHR / fetch)
    ScriptCall,
    /// Issued by the replay engine
    Replayed,
}

/// Record status.
///
/// `Pending` is the initial state. `Completed` and `Error` are terminal and
/// only reachable from `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Waiting for a response
    Pending,
    /// Response headers (and for replays, the body) arrived
    Completed,
    /// The replay transport failed
    Error,
}

impl RecordStatus {
    /// Returns `true` for `Completed` and `Error`
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Coarse classification of an HTTP status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// 1xx
    Informational,
    /// 2xx
    Success,
    /// 3xx
    Redirection,
    /// 4xx
    ClientError,
    /// 5xx
    ServerError,
}

impl StatusClass {
    /// Classify a status code; everything from 500 up is a server error,
    /// `None` below 100
    #[must_use]
    pub const fn of(code: u16) -> Option<Self> {
        match code {
            100..=199 => Some(Self::Informational),
            200..=299 => Some(Self::Success),
            300..=399 => Some(Self::Redirection),
            400..=499 => Some(Self::ClientError),
            500.. => Some(Self::ServerError),
            _ => None,
        }
    }
}

/// One header line. Order and duplicates are preserved wherever headers are
/// stored as `Vec<Header>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name as reported
    pub name: String,
    /// Header value as reported
    pub value: String,
}

impl Header {
    /// Create a header line
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Rejected status transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record {id} is already {from}, cannot move to {to}")]
pub struct TransitionError {
    /// Record that refused the transition
    pub id: RecordId,
    /// Its current (terminal) status
    pub from: RecordStatus,
    /// The requested status
    pub to: RecordStatus,
}

/// One logical HTTP exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    /// Unique id, assigned at creation
    pub id: RecordId,
    /// Exact URL string
    pub url: String,
    /// HTTP method as reported or entered
    pub method: String,
    /// Origin of the record
    pub kind: RequestKind,
    /// Wall clock time the record was created
    pub created_at: DateTime<Utc>,
    /// Host initiation time; half of the correlation key
    pub timestamp: HostTimestamp,
    /// Request headers, `None` until captured
    pub request_headers: Option<Vec<Header>>,
    /// Request body, resolved once at capture or replay time
    pub request_body: Option<RequestBody>,
    /// Response headers, `None` until received
    pub response_headers: Option<Vec<Header>>,
    /// Response status code, `None` until received
    pub status_code: Option<u16>,
    /// Status machine position
    pub status: RecordStatus,
    /// Response body text. Only replays ever fill this.
    pub response_body: Option<String>,
    /// `true` for records created by the replay engine
    pub is_replayed: bool,
    /// The record this one was replayed from. The source may since have been
    /// evicted.
    pub source_record_id: Option<RecordId>,
    /// Human readable failure description
    pub error: Option<String>,
}

impl RequestRecord {
    /// A freshly observed request in `Pending` status
    #[must_use]
    pub fn captured(
        id: RecordId,
        kind: RequestKind,
        url: String,
        method: String,
        timestamp: HostTimestamp,
        request_body: Option<RequestBody>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            url,
            method,
            kind,
            created_at,
            timestamp,
            request_headers: None,
            request_body,
            response_headers: None,
            status_code: None,
            status: RecordStatus::Pending,
            response_body: None,
            is_replayed: false,
            source_record_id: None,
            error: None,
        }
    }

    /// Move `Pending` to `Completed`, filling the response fields.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the record is already terminal; the
    /// record is left untouched in that case.
    pub fn complete(
        &mut self,
        status_code: u16,
        response_headers: Vec<Header>,
        response_body: Option<String>,
    ) -> Result<(), TransitionError> {
        self.ensure_pending(RecordStatus::Completed)?;
        self.status = RecordStatus::Completed;
        self.status_code = Some(status_code);
        self.response_headers = Some(response_headers);
        self.response_body = response_body;
        Ok(())
    }

    /// Move `Pending` to `Error` with a description. Response fields stay empty.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the record is already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_pending(RecordStatus::Error)?;
        self.status = RecordStatus::Error;
        self.error = Some(error.into());
        Ok(())
    }

    /// Classification of the status code, if one was received
    #[must_use]
    pub fn status_class(&self) -> Option<StatusClass> {
        self.status_code.and_then(StatusClass::of)
    }

    const fn ensure_pending(&self, to: RecordStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}
