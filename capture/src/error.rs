//! Session errors.

use crate::record::RecordId;
use repeater_runtime::StoreError;
use thiserror::Error;

/// Failures reported to callers of [`CaptureSession`](crate::CaptureSession).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The id is unknown, or its record was evicted or cleared
    #[error("record {0} not found")]
    RecordNotFound(RecordId),

    /// The session is shutting down or its runtime failed
    #[error(transparent)]
    Store(#[from] StoreError),
}
