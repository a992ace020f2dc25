//! Event correlator.
//!
//! The host reports initiation, request-headers and response-headers as three
//! separate callbacks without a shared transaction id. They are joined on the
//! pair (exact url, exact initiation timestamp). All matching goes through
//! [`correlate`], so a host that one day supplies a real request id only
//! changes [`CorrelationKey`] and that function.
//!
//! A miss is an expected race (filtered type, capture toggled mid-flight,
//! record already evicted) and is reported as [`Correlation::Miss`], never as
//! an error.

use crate::events::{LifecycleEvent, RequestHeadersReady, ResponseHeadersReceived};
use crate::history::HistoryStore;
use crate::record::{HostTimestamp, RecordId, RequestRecord, TransitionError};

/// Join key for lifecycle events of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelationKey<'a> {
    /// Exact url string
    pub url: &'a str,
    /// Exact initiation timestamp
    pub timestamp: HostTimestamp,
}

impl<'a> CorrelationKey<'a> {
    /// Key carried by a lifecycle event
    pub fn of<E: LifecycleEvent>(event: &'a E) -> Self {
        Self {
            url: event.url(),
            timestamp: event.timestamp(),
        }
    }
}

/// Outcome of attaching an event to the history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Correlation {
    /// The event was folded into this record
    Attached(RecordId),
    /// No record matched; the event is dropped
    Miss,
    /// A record matched but is already terminal; it was left untouched
    Rejected(TransitionError),
}

/// Match an event key to the most recent record carrying it, or nothing.
pub fn correlate<'h>(
    history: &'h mut HistoryStore,
    key: CorrelationKey<'_>,
) -> Option<&'h mut RequestRecord> {
    history.find_by_correlation_key(key.url, key.timestamp)
}

/// Attach outgoing request headers to their record.
pub fn attach_request_headers(
    history: &mut HistoryStore,
    event: RequestHeadersReady,
) -> Correlation {
    let Some(record) = correlate(history, CorrelationKey::of(&event)) else {
        return Correlation::Miss;
    };
    record.request_headers = Some(event.request_headers);
    Correlation::Attached(record.id)
}

/// Attach response status and headers to their record and complete it.
pub fn attach_response(history: &mut HistoryStore, event: ResponseHeadersReceived) -> Correlation {
    let Some(record) = correlate(history, CorrelationKey::of(&event)) else {
        return Correlation::Miss;
    };
    match record.complete(event.status_code, event.response_headers, None) {
        Ok(()) => Correlation::Attached(record.id),
        Err(error) => Correlation::Rejected(error),
    }
}
