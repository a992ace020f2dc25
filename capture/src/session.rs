//! Capture session facade.
//!
//! A [`CaptureSession`] owns everything that used to be ambient: the enabled
//! flag, the history and the id counter live in one [`CaptureState`] behind a
//! [`Store`]. It is created once when the process starts and torn down with
//! [`CaptureSession::shutdown`].
//!
//! Host lifecycle callbacks and UI commands both enter here. Lifecycle
//! callbacks always answer [`HostDirective::Proceed`], even when the session
//! can no longer record them.

use crate::error::SessionError;
use crate::events::{HostDirective, RequestHeadersReady, RequestInitiated, ResponseHeadersReceived};
use crate::notify::{NotificationBus, Observer, ObserverId};
use crate::record::{RecordId, RequestRecord};
use crate::reducer::{CaptureEnvironment, CaptureReducer};
use crate::replay::ReplayRequest;
use crate::settings::Settings;
use crate::types::{CaptureAction, CaptureState};
use repeater_runtime::{EffectHandle, Store};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Store running the capture reducer.
pub type CaptureStore = Store<CaptureState, CaptureAction, CaptureEnvironment, CaptureReducer>;

/// Enabled flag plus the full history, newest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Capture gate flag
    pub intercept_enabled: bool,
    /// Every record held
    pub history: Vec<RequestRecord>,
}

/// Acknowledgement that a replay was started.
///
/// The outcome arrives later as a record-changed notification. The handle
/// resolves once the outcome has been written to the history.
#[derive(Clone)]
pub struct ReplayStarted {
    /// Record created for the replay
    pub id: RecordId,
    /// Completion of the outbound call and its fold-back
    pub handle: EffectHandle,
}

impl std::fmt::Debug for ReplayStarted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayStarted")
            .field("id", &self.id)
            .field("pending", &self.handle.pending())
            .finish()
    }
}

/// One capture session.
#[derive(Clone)]
pub struct CaptureSession {
    store: CaptureStore,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("environment", self.store.environment())
            .finish_non_exhaustive()
    }
}

impl CaptureSession {
    /// Start a session, reading the persisted capture flag once.
    ///
    /// Unreadable settings are logged and treated as "capture disabled".
    pub async fn start(environment: CaptureEnvironment) -> Self {
        let settings = match environment.settings.load().await {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(error = %error, "Could not read settings, capture starts disabled");
                Settings::default()
            },
        };
        tracing::info!(enabled = settings.intercept_enabled, "Capture session started");
        Self::with_state(CaptureState::from_settings(settings), environment)
    }

    /// Session over an explicit initial state
    #[must_use]
    pub fn with_state(state: CaptureState, environment: CaptureEnvironment) -> Self {
        Self {
            store: Store::new(state, CaptureReducer::new(), environment),
        }
    }

    /// Underlying store
    #[must_use]
    pub const fn store(&self) -> &CaptureStore {
        &self.store
    }

    /// Notification bus of this session
    #[must_use]
    pub fn notifications(&self) -> &NotificationBus {
        &self.store.environment().notifications
    }

    /// Attach a notification observer
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> ObserverId {
        self.notifications().subscribe(observer)
    }

    /// Detach a notification observer
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.notifications().unsubscribe(id)
    }

    async fn observe(&self, action: CaptureAction) -> HostDirective {
        if let Err(error) = self.store.send(action).await {
            tracing::debug!(error = %error, "Lifecycle event not recorded");
        }
        HostDirective::Proceed
    }

    /// Host callback: a request is about to be sent
    pub async fn request_initiated(&self, event: RequestInitiated) -> HostDirective {
        self.observe(CaptureAction::RequestInitiated(event)).await
    }

    /// Host callback: outgoing headers are final
    pub async fn request_headers_ready(&self, event: RequestHeadersReady) -> HostDirective {
        self.observe(CaptureAction::RequestHeadersReady(event)).await
    }

    /// Host callback: response status and headers arrived
    pub async fn response_headers_received(&self, event: ResponseHeadersReceived) -> HostDirective {
        self.observe(CaptureAction::ResponseHeadersReceived(event)).await
    }

    /// Enabled flag plus full history
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.store
            .state(|state| SessionSnapshot {
                intercept_enabled: state.gate.is_enabled(),
                history: state.history.snapshot(),
            })
            .await
    }

    /// Current capture flag
    pub async fn is_enabled(&self) -> bool {
        self.store.state(|state| state.gate.is_enabled()).await
    }

    /// Toggle capture and persist the flag.
    ///
    /// The returned handle resolves once the settings write finished.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] while shutting down.
    pub async fn set_intercept_enabled(&self, enabled: bool) -> Result<EffectHandle, SessionError> {
        Ok(self
            .store
            .send(CaptureAction::SetInterceptEnabled { enabled })
            .await?)
    }

    /// One record by id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RecordNotFound`] for unknown, evicted or
    /// cleared ids.
    pub async fn record(&self, id: RecordId) -> Result<RequestRecord, SessionError> {
        self.store
            .state(|state| state.history.find_by_id(id).cloned())
            .await
            .ok_or(SessionError::RecordNotFound(id))
    }

    /// Start a replay of `source_id` with the edited descriptor.
    ///
    /// Returns as soon as the pending replay record is in the history.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RecordNotFound`] when the source record is not
    /// in the history, or [`SessionError::Store`] while shutting down.
    pub async fn modify_and_resend(
        &self,
        source_id: RecordId,
        request: ReplayRequest,
    ) -> Result<ReplayStarted, SessionError> {
        let (started, handle) = self
            .store
            .send_and_read(
                CaptureAction::ModifyAndResend { source_id, request },
                |state| state.last_replay,
            )
            .await?;

        started
            .map(|id| ReplayStarted { id, handle })
            .ok_or(SessionError::RecordNotFound(source_id))
    }

    /// Drop every record.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] while shutting down.
    pub async fn clear_history(&self) -> Result<(), SessionError> {
        self.store.send(CaptureAction::ClearHistory).await?;
        Ok(())
    }

    /// Records whose url or method contains `query`, ignoring case
    pub async fn filter(&self, query: &str) -> Vec<RequestRecord> {
        self.store
            .state(|state| state.history.filter(query).cloned().collect())
            .await
    }

    /// Stop accepting input and wait for in-flight replays and settings
    /// writes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if they do not finish within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SessionError> {
        self.store.shutdown(timeout).await?;
        tracing::info!("Capture session stopped");
        Ok(())
    }
}
