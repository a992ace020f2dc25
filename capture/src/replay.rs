//! Replay engine.
//!
//! Turns a user-edited request into a new history record plus one outbound
//! call, then folds the call's outcome back into that record by id:
//!
//! 1. no validation of its own; the transport rejects what it cannot send
//! 2. a `replayed` record is appended in `pending` status
//! 3. the call is issued with method and headers exactly as given, without
//!    a body for GET and HEAD
//! 4. success completes the record with status, headers and body text
//! 5. failure moves the record to `error` with a description, single attempt
//!
//! The outcome is applied by id, never through a reference held across the
//! network call, so records appended or evicted meanwhile are tolerated.

use crate::body::{RequestBody, editable_text};
use crate::history::HistoryStore;
use crate::record::{Header, HostTimestamp, RecordId, RequestKind, RequestRecord, RecordStatus};
use crate::transport::{OutboundRequest, ReplayResponse, ReplayTransport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// User-edited request descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Target url
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Headers in order
    #[serde(default)]
    pub headers: Vec<Header>,
    /// Body text; ignored for GET and HEAD
    #[serde(default)]
    pub body: String,
}

impl ReplayRequest {
    /// Prefill an editable descriptor from a captured record.
    #[must_use]
    pub fn prefill(record: &RequestRecord) -> Self {
        Self {
            url: record.url.clone(),
            method: record.method.clone(),
            headers: record.request_headers.clone().unwrap_or_default(),
            body: editable_text(record.request_body.as_ref()),
        }
    }

    /// Trim header names and drop rows whose name is blank.
    ///
    /// Editing forms produce empty rows; values are kept verbatim.
    #[must_use]
    pub fn without_blank_headers(mut self) -> Self {
        self.headers = self
            .headers
            .into_iter()
            .filter_map(|header| {
                let name = header.name.trim();
                if name.is_empty() {
                    None
                } else {
                    Some(Header::new(name, header.value))
                }
            })
            .collect();
        self
    }

    /// The request as it goes on the wire.
    #[must_use]
    pub fn outbound(&self) -> OutboundRequest {
        OutboundRequest {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: body_allowed(&self.method).then(|| self.body.clone()),
        }
    }
}

/// `false` for methods that must never carry a body (GET, HEAD).
#[must_use]
pub fn body_allowed(method: &str) -> bool {
    !(method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD"))
}

/// Result of one replay attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ReplayOutcome {
    /// A full response was read
    Completed(ReplayResponse),
    /// The transport failed
    Failed {
        /// Human readable description
        error: String,
    },
}

/// Result of folding an outcome into the history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The record now has this terminal status
    Updated(RecordStatus),
    /// The record is gone (evicted or cleared); the outcome is dropped
    Missing,
    /// The record was already terminal and was left untouched
    AlreadyTerminal(RecordStatus),
}

/// Step 2: the `pending` record for a replay.
///
/// Stores the body exactly as sent, so GET and HEAD replays record none.
#[must_use]
pub fn open_record(
    id: RecordId,
    source_id: RecordId,
    request: &OutboundRequest,
    now: DateTime<Utc>,
) -> RequestRecord {
    let mut record = RequestRecord::captured(
        id,
        RequestKind::Replayed,
        request.url.clone(),
        request.method.clone(),
        HostTimestamp::from_datetime(now),
        request.body.clone().map(RequestBody::Text),
        now,
    );
    record.request_headers = Some(request.headers.clone());
    record.is_replayed = true;
    record.source_record_id = Some(source_id);
    record
}

/// Step 3: issue the call once and describe how it ended.
pub fn dispatch(
    transport: Arc<dyn ReplayTransport>,
    id: RecordId,
    request: OutboundRequest,
) -> impl Future<Output = ReplayOutcome> + Send + 'static {
    async move {
        tracing::debug!(record = %id, method = %request.method, url = %request.url, "Sending replay");
        match transport.execute(request).await {
            Ok(response) => ReplayOutcome::Completed(response),
            Err(error) => ReplayOutcome::Failed {
                error: error.to_string(),
            },
        }
    }
}

/// Steps 4 and 5: write the outcome into the record with this id.
pub fn apply_outcome(history: &mut HistoryStore, id: RecordId, outcome: ReplayOutcome) -> Applied {
    let Some(record) = history.find_by_id_mut(id) else {
        return Applied::Missing;
    };

    let result = match outcome {
        ReplayOutcome::Completed(response) => {
            record.complete(response.status_code, response.headers, Some(response.body))
        },
        ReplayOutcome::Failed { error } => {
            let error = if error.trim().is_empty() {
                "replay failed".to_string()
            } else {
                error
            };
            record.fail(error)
        },
    };

    match result {
        Ok(()) => Applied::Updated(record.status),
        Err(rejected) => Applied::AlreadyTerminal(rejected.from),
    }
}
