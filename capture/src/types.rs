//! Capture session state and actions.

use crate::controller::CaptureGate;
use crate::events::{RequestHeadersReady, RequestInitiated, ResponseHeadersReceived};
use crate::history::HistoryStore;
use crate::record::RecordId;
use crate::replay::{ReplayOutcome, ReplayRequest};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};

/// Everything a capture session owns.
#[derive(Clone, Debug)]
pub struct CaptureState {
    /// Enabled flag and resource filter
    pub gate: CaptureGate,
    /// Request history
    pub history: HistoryStore,
    /// Id of the record created by the most recent replay command, if it
    /// started one
    pub last_replay: Option<RecordId>,
    next_id: u64,
    settings_revision: u64,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new(false)
    }
}

impl CaptureState {
    /// Empty session with the given capture flag
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            gate: CaptureGate::new(enabled),
            history: HistoryStore::new(),
            last_replay: None,
            next_id: 1,
            settings_revision: 0,
        }
    }

    /// Empty session with capture enabled
    #[must_use]
    pub fn enabled() -> Self {
        Self::new(true)
    }

    /// Empty session restored from persisted settings
    #[must_use]
    pub fn from_settings(settings: Settings) -> Self {
        let mut state = Self::new(settings.intercept_enabled);
        state.settings_revision = settings.revision;
        state
    }

    /// Hand out the next record id. Ids are never reused.
    pub const fn allocate_id(&mut self) -> RecordId {
        let id = RecordId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Settings document for the next write, with a bumped revision
    pub const fn next_settings(&mut self) -> Settings {
        self.settings_revision += 1;
        Settings {
            intercept_enabled: self.gate.is_enabled(),
            revision: self.settings_revision,
        }
    }
}

/// Every input to the capture reducer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureAction {
    // Host lifecycle events
    /// A request is about to be sent
    RequestInitiated(RequestInitiated),
    /// Its outgoing headers are final
    RequestHeadersReady(RequestHeadersReady),
    /// Its response status and headers arrived
    ResponseHeadersReceived(ResponseHeadersReceived),

    // User commands
    /// Toggle capture (persisted)
    #[serde(rename_all = "camelCase")]
    SetInterceptEnabled {
        /// New flag
        enabled: bool,
    },
    /// Drop every record
    ClearHistory,
    /// Resend an edited copy of a record
    #[serde(rename_all = "camelCase")]
    ModifyAndResend {
        /// Record being replayed
        source_id: RecordId,
        /// Edited descriptor
        request: ReplayRequest,
    },

    // Effect feedback
    /// A replay call finished
    #[serde(rename_all = "camelCase")]
    ReplayFinished {
        /// Record created for the replay
        id: RecordId,
        /// How it ended
        outcome: ReplayOutcome,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut state = CaptureState::default();
        assert_eq!(state.allocate_id(), RecordId::new(1));
        assert_eq!(state.allocate_id(), RecordId::new(2));
        state.history.clear();
        assert_eq!(state.allocate_id(), RecordId::new(3));
    }

    #[test]
    fn settings_revision_continues_from_persisted() {
        let mut state = CaptureState::from_settings(Settings {
            intercept_enabled: true,
            revision: 7,
        });
        assert!(state.gate.is_enabled());
        let next = state.next_settings();
        assert_eq!(next.revision, 8);
        assert!(next.intercept_enabled);
    }
}
