//! Capture reducer.
//!
//! Every handler runs under the store's write lock as one discrete step, so
//! the history never changes in the middle of a handler. Work that has to
//! wait (the replay call, the settings write) is returned as an effect and
//! comes back, if at all, as a new action that re-fetches its record by id.
//!
//! Notifications are published from inside the step that caused them, which
//! keeps them in history order for every observer.

use crate::body::BodyDescriptor;
use crate::correlator::{self, Correlation};
use crate::events::LifecycleEvent;
use crate::notify::{Notification, NotificationBus};
use crate::record::{RecordId, RecordStatus, RequestRecord};
use crate::replay::{self, Applied, ReplayRequest};
use crate::settings::SettingsStore;
use crate::telemetry::CaptureMetrics;
use crate::transport::ReplayTransport;
use crate::types::{CaptureAction, CaptureState};
use repeater_core::environment::Clock;
use repeater_core::{effect::Effect, reducer::Reducer};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Injected dependencies of the capture reducer.
#[derive(Clone)]
pub struct CaptureEnvironment {
    /// Wall clock for record creation times
    pub clock: Arc<dyn Clock>,
    /// Outbound HTTP for replays
    pub transport: Arc<dyn ReplayTransport>,
    /// Persistence of the capture flag
    pub settings: Arc<dyn SettingsStore>,
    /// Observers of history changes
    pub notifications: NotificationBus,
}

impl CaptureEnvironment {
    /// Bundle the dependencies
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        transport: Arc<dyn ReplayTransport>,
        settings: Arc<dyn SettingsStore>,
        notifications: NotificationBus,
    ) -> Self {
        Self {
            clock,
            transport,
            settings,
            notifications,
        }
    }
}

impl std::fmt::Debug for CaptureEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEnvironment")
            .field("notifications", &self.notifications)
            .finish_non_exhaustive()
    }
}

/// Reducer for a capture session.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaptureReducer;

impl CaptureReducer {
    /// Create the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn append(state: &mut CaptureState, record: RequestRecord, env: &CaptureEnvironment) {
        CaptureMetrics::record_created(record.kind);
        let notification = Notification::RecordAppended {
            record: Box::new(record.clone()),
        };
        if let Some(evicted) = state.history.append(record) {
            tracing::trace!(record = %evicted.id, "History full, evicted oldest record");
        }
        env.notifications.publish(&notification);
    }

    fn changed(id: RecordId, env: &CaptureEnvironment) {
        env.notifications
            .publish(&Notification::RecordChanged { record_id: id });
    }

    fn on_correlation(correlation: Correlation, event: &'static str, env: &CaptureEnvironment) {
        match correlation {
            Correlation::Attached(id) => Self::changed(id, env),
            Correlation::Miss => {
                CaptureMetrics::record_miss(event);
                tracing::debug!(event, "No record for lifecycle event, ignoring");
            },
            Correlation::Rejected(error) => {
                tracing::debug!(event, error = %error, "Lifecycle event for finished record, ignoring");
            },
        }
    }

    fn modify_and_resend(
        state: &mut CaptureState,
        source_id: RecordId,
        request: &ReplayRequest,
        env: &CaptureEnvironment,
    ) -> SmallVec<[Effect<CaptureAction>; 4]> {
        state.last_replay = None;

        if state.history.find_by_id(source_id).is_none() {
            tracing::debug!(source = %source_id, "Replay source not in history, ignoring");
            return SmallVec::new();
        }

        let id = state.allocate_id();
        let outbound = request.outbound();
        let record = replay::open_record(id, source_id, &outbound, env.clock.now());
        Self::append(state, record, env);
        state.last_replay = Some(id);

        tracing::info!(record = %id, source = %source_id, method = %outbound.method, "Replay started");

        let call = replay::dispatch(Arc::clone(&env.transport), id, outbound);
        smallvec![Effect::future(async move {
            let outcome = call.await;
            Some(CaptureAction::ReplayFinished { id, outcome })
        })]
    }
}

impl Reducer for CaptureReducer {
    type State = CaptureState;
    type Action = CaptureAction;
    type Environment = CaptureEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            CaptureAction::RequestInitiated(event) => {
                let Some(kind) = state.gate.admit(event.resource_type()) else {
                    return SmallVec::new();
                };
                let id = state.allocate_id();
                let record = RequestRecord::captured(
                    id,
                    kind,
                    event.url,
                    event.method,
                    event.timestamp,
                    event.request_body.and_then(BodyDescriptor::resolve),
                    env.clock.now(),
                );
                Self::append(state, record, env);
                SmallVec::new()
            },

            CaptureAction::RequestHeadersReady(event) => {
                if !state.gate.admits(&event) {
                    return SmallVec::new();
                }
                let correlation = correlator::attach_request_headers(&mut state.history, event);
                Self::on_correlation(correlation, "request_headers", env);
                SmallVec::new()
            },

            CaptureAction::ResponseHeadersReceived(event) => {
                if !state.gate.admits(&event) {
                    return SmallVec::new();
                }
                let correlation = correlator::attach_response(&mut state.history, event);
                Self::on_correlation(correlation, "response_headers", env);
                SmallVec::new()
            },

            CaptureAction::SetInterceptEnabled { enabled } => {
                if state.gate.set_enabled(enabled) {
                    tracing::info!(enabled, "Capture toggled");
                }
                let settings = state.next_settings();
                let store = Arc::clone(&env.settings);
                smallvec![Effect::future(async move {
                    if let Err(error) = store.save(settings).await {
                        tracing::warn!(error = %error, "Failed to persist capture flag");
                    }
                    None
                })]
            },

            CaptureAction::ClearHistory => {
                let dropped = state.history.clear();
                tracing::info!(dropped, "History cleared");
                SmallVec::new()
            },

            CaptureAction::ModifyAndResend { source_id, request } => {
                Self::modify_and_resend(state, source_id, &request, env)
            },

            CaptureAction::ReplayFinished { id, outcome } => {
                match replay::apply_outcome(&mut state.history, id, outcome) {
                    Applied::Updated(status) => {
                        if status == RecordStatus::Completed {
                            CaptureMetrics::replay_completed();
                            tracing::info!(record = %id, "Replay completed");
                        } else {
                            CaptureMetrics::replay_failed();
                            let error = state
                                .history
                                .find_by_id(id)
                                .and_then(|record| record.error.as_deref())
                                .unwrap_or_default();
                            tracing::warn!(record = %id, error, "Replay failed");
                        }
                        Self::changed(id, env);
                    },
                    Applied::Missing => {
                        tracing::debug!(record = %id, "Replay finished after its record left the history");
                    },
                    Applied::AlreadyTerminal(status) => {
                        tracing::debug!(record = %id, %status, "Replay outcome for finished record, ignoring");
                    },
                }
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use crate::body::{FormField, RequestBody};
    use crate::events::{RequestHeadersReady, RequestInitiated, ResourceType, ResponseHeadersReceived};
    use crate::notify::ChannelObserver;
    use crate::record::{Header, HostTimestamp, RequestKind};
    use crate::replay::ReplayOutcome;
    use crate::settings::MemorySettings;
    use crate::transport::{OutboundRequest, ReplayResponse, TransportError, TransportFuture};
    use proptest::prelude::*;
    use repeater_testing::{ReducerTest, SteppingClock, assertions, test_clock};
    use tokio::sync::mpsc;

    struct Unused;

    impl ReplayTransport for Unused {
        fn execute(&self, _request: OutboundRequest) -> TransportFuture<'_> {
            Box::pin(async { Err(TransportError::Request("not expected in reducer tests".into())) })
        }
    }

    fn env() -> CaptureEnvironment {
        CaptureEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(Unused),
            Arc::new(MemorySettings::default()),
            NotificationBus::new(),
        )
    }

    fn env_with_observer() -> (CaptureEnvironment, mpsc::UnboundedReceiver<Notification>) {
        let env = env();
        let (observer, receiver) = ChannelObserver::channel();
        env.notifications.subscribe(Arc::new(observer));
        (env, receiver)
    }

    fn initiated(url: &str, ts: f64, resource_type: ResourceType) -> CaptureAction {
        CaptureAction::RequestInitiated(RequestInitiated {
            url: url.to_string(),
            method: "GET".to_string(),
            timestamp: HostTimestamp::from_millis(ts),
            resource_type,
            request_body: None,
        })
    }

    fn headers(url: &str, ts: f64, resource_type: ResourceType) -> CaptureAction {
        CaptureAction::RequestHeadersReady(RequestHeadersReady {
            url: url.to_string(),
            method: "GET".to_string(),
            timestamp: HostTimestamp::from_millis(ts),
            resource_type,
            request_headers: vec![Header::new("accept", "*/*")],
        })
    }

    fn received(url: &str, ts: f64, status: u16) -> CaptureAction {
        CaptureAction::ResponseHeadersReceived(ResponseHeadersReceived {
            url: url.to_string(),
            method: "GET".to_string(),
            timestamp: HostTimestamp::from_millis(ts),
            resource_type: ResourceType::XmlHttpRequest,
            status_code: status,
            response_headers: Vec::new(),
        })
    }

    #[test]
    fn init_then_response_completes_one_record() {
        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::enabled())
            .when_actions([
                initiated("https://a.test/x", 1000.0, ResourceType::XmlHttpRequest),
                received("https://a.test/x", 1000.0, 204),
            ])
            .then_state(|state| {
                assert_eq!(state.history.len(), 1);
                let record = state.history.newest().unwrap();
                assert_eq!(record.status, RecordStatus::Completed);
                assert_eq!(record.status_code, Some(204));
                assert_eq!(record.kind, RequestKind::ScriptCall);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn disabled_capture_ignores_every_event() {
        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::default())
            .when_actions([
                initiated("https://a.test/x", 1.0, ResourceType::MainFrame),
                headers("https://a.test/x", 1.0, ResourceType::MainFrame),
                received("https://a.test/x", 1.0, 200),
            ])
            .then_state(|state| assert!(state.history.is_empty()))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn disabling_mid_flight_freezes_the_record() {
        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::enabled())
            .when_actions([
                initiated("https://a.test/x", 1.0, ResourceType::MainFrame),
                CaptureAction::SetInterceptEnabled { enabled: false },
                received("https://a.test/x", 1.0, 200),
            ])
            .then_state(|state| {
                assert_eq!(state.history.len(), 1);
                assert_eq!(
                    state.history.newest().unwrap().status,
                    RecordStatus::Pending
                );
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[test]
    fn filtered_types_never_create_records() {
        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::enabled())
            .when_actions([
                initiated("https://a.test/logo.png", 1.0, ResourceType::Image),
                initiated("https://a.test/site.css", 2.0, ResourceType::Stylesheet),
                initiated("https://a.test/app.js", 3.0, ResourceType::Script),
            ])
            .then_state(|state| assert!(state.history.is_empty()))
            .run();
    }

    #[test]
    fn filtered_types_never_touch_a_captured_record() {
        let (env, mut receiver) = env_with_observer();
        let image_response = CaptureAction::ResponseHeadersReceived(ResponseHeadersReceived {
            url: "https://a.test/x".into(),
            method: "GET".into(),
            timestamp: HostTimestamp::from_millis(1.0),
            resource_type: ResourceType::Image,
            status_code: 200,
            response_headers: vec![Header::new("content-type", "image/png")],
        });

        ReducerTest::new(CaptureReducer::new())
            .with_env(env)
            .given_state(CaptureState::enabled())
            .when_actions([
                initiated("https://a.test/x", 1.0, ResourceType::XmlHttpRequest),
                headers("https://a.test/x", 1.0, ResourceType::Image),
                image_response,
            ])
            .then_state(|state| {
                assert_eq!(state.history.len(), 1);
                let record = state.history.newest().unwrap();
                assert_eq!(record.status, RecordStatus::Pending);
                assert_eq!(record.request_headers, None);
                assert_eq!(record.response_headers, None);
                assert_eq!(record.status_code, None);
            })
            .then_effects(assertions::assert_no_effects)
            .run();

        assert!(matches!(
            receiver.try_recv().unwrap(),
            Notification::RecordAppended { .. }
        ));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn form_body_is_resolved_at_capture() {
        let action = CaptureAction::RequestInitiated(RequestInitiated {
            url: "https://a.test/login".into(),
            method: "POST".into(),
            timestamp: HostTimestamp::from_millis(5.0),
            resource_type: ResourceType::MainFrame,
            request_body: Some(BodyDescriptor {
                form_data: Some(vec![FormField::new("user", ["ann"])]),
                ..BodyDescriptor::default()
            }),
        });

        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::enabled())
            .when_action(action)
            .then_state(|state| {
                let record = state.history.newest().unwrap();
                assert_eq!(record.kind, RequestKind::DocumentLoad);
                assert_eq!(
                    record.request_body,
                    Some(RequestBody::Form(vec![FormField::new("user", ["ann"])]))
                );
            })
            .run();
    }

    #[test]
    fn notifications_follow_history_order() {
        let (env, mut receiver) = env_with_observer();
        let reducer = CaptureReducer::new();
        let mut state = CaptureState::enabled();

        reducer.reduce(&mut state, initiated("https://a.test/a", 1.0, ResourceType::XmlHttpRequest), &env);
        reducer.reduce(&mut state, headers("https://a.test/a", 1.0, ResourceType::XmlHttpRequest), &env);
        reducer.reduce(&mut state, received("https://a.test/a", 1.0, 200), &env);
        reducer.reduce(&mut state, received("https://a.test/missing", 1.0, 200), &env);

        let Notification::RecordAppended { record } = receiver.try_recv().unwrap() else {
            panic!("expected append first");
        };
        assert_eq!(record.id, RecordId::new(1));
        assert_eq!(
            receiver.try_recv().unwrap(),
            Notification::RecordChanged { record_id: RecordId::new(1) }
        );
        assert_eq!(
            receiver.try_recv().unwrap(),
            Notification::RecordChanged { record_id: RecordId::new(1) }
        );
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn clear_keeps_the_id_counter() {
        let reducer = CaptureReducer::new();
        let env = env();
        let mut state = CaptureState::enabled();

        reducer.reduce(&mut state, initiated("https://a.test/1", 1.0, ResourceType::MainFrame), &env);
        reducer.reduce(&mut state, CaptureAction::ClearHistory, &env);
        assert!(state.history.is_empty());
        assert_eq!(state.history.all().count(), 0);

        reducer.reduce(&mut state, initiated("https://a.test/2", 2.0, ResourceType::MainFrame), &env);
        assert_eq!(state.history.newest().unwrap().id, RecordId::new(2));
    }

    #[test]
    fn replay_of_unknown_source_does_nothing() {
        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::enabled())
            .when_action(CaptureAction::ModifyAndResend {
                source_id: RecordId::new(42),
                request: ReplayRequest {
                    url: "https://a.test/".into(),
                    method: "GET".into(),
                    headers: Vec::new(),
                    body: String::new(),
                },
            })
            .then_state(|state| {
                assert!(state.history.is_empty());
                assert_eq!(state.last_replay, None);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn replay_appends_pending_record_and_spawns_call() {
        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::enabled())
            .when_actions([
                initiated("https://a.test/x", 1.0, ResourceType::XmlHttpRequest),
                CaptureAction::ModifyAndResend {
                    source_id: RecordId::new(1),
                    request: ReplayRequest {
                        url: "https://a.test/x".into(),
                        method: "GET".into(),
                        headers: vec![Header::new("x-test", "1")],
                        body: "dropped".into(),
                    },
                },
            ])
            .then_state(|state| {
                assert_eq!(state.history.len(), 2);
                assert_eq!(state.last_replay, Some(RecordId::new(2)));
                let replayed = state.history.newest().unwrap();
                assert_eq!(replayed.kind, RequestKind::Replayed);
                assert_eq!(replayed.status, RecordStatus::Pending);
                assert_eq!(replayed.source_record_id, Some(RecordId::new(1)));
                assert_eq!(replayed.request_body, None);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn repeated_replays_get_distinct_timestamps() {
        let clock = SteppingClock::new(test_clock().now(), chrono::Duration::milliseconds(5));
        let env = CaptureEnvironment::new(
            Arc::new(clock),
            Arc::new(Unused),
            Arc::new(MemorySettings::default()),
            NotificationBus::new(),
        );
        let resend = || CaptureAction::ModifyAndResend {
            source_id: RecordId::new(1),
            request: ReplayRequest {
                url: "https://a.test/x".into(),
                method: "GET".into(),
                headers: Vec::new(),
                body: String::new(),
            },
        };

        ReducerTest::new(CaptureReducer::new())
            .with_env(env)
            .given_state(CaptureState::enabled())
            .when_actions([
                initiated("https://a.test/x", 1.0, ResourceType::XmlHttpRequest),
                resend(),
                resend(),
            ])
            .then_state(|state| {
                let first = state.history.find_by_id(RecordId::new(2)).unwrap();
                let second = state.history.find_by_id(RecordId::new(3)).unwrap();
                assert_ne!(first.timestamp, second.timestamp);
                assert!(second.created_at > first.created_at);
                assert!(second.timestamp.as_millis() > first.timestamp.as_millis());
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 2))
            .run();
    }

    #[test]
    fn replay_outcome_for_evicted_record_is_dropped() {
        let (env, mut receiver) = env_with_observer();
        ReducerTest::new(CaptureReducer::new())
            .with_env(env)
            .given_state(CaptureState::enabled())
            .when_action(CaptureAction::ReplayFinished {
                id: RecordId::new(9),
                outcome: ReplayOutcome::Completed(ReplayResponse {
                    status_code: 200,
                    headers: Vec::new(),
                    body: String::new(),
                }),
            })
            .then_state(|state| assert!(state.history.is_empty()))
            .run();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn toggle_persists_through_an_effect() {
        ReducerTest::new(CaptureReducer::new())
            .with_env(env())
            .given_state(CaptureState::default())
            .when_action(CaptureAction::SetInterceptEnabled { enabled: true })
            .then_state(|state| assert!(state.gate.is_enabled()))
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    fn lifecycle() -> impl Strategy<Value = CaptureAction> {
        let url = prop::sample::select(vec!["https://a.test/1", "https://a.test/2", "https://b.test/"]);
        let ts = (0_u8..4).prop_map(f64::from);
        let kind = prop::sample::select(vec![
            ResourceType::MainFrame,
            ResourceType::XmlHttpRequest,
            ResourceType::Image,
        ]);
        (0_u8..3, url, ts, kind).prop_map(|(which, url, ts, kind)| match which {
            0 => initiated(url, ts, kind),
            1 => headers(url, ts, kind),
            _ => received(url, ts, 200),
        })
    }

    proptest! {
        #[test]
        fn disabled_sessions_never_change(events in prop::collection::vec(lifecycle(), 0..60)) {
            let reducer = CaptureReducer::new();
            let env = env();
            let mut state = CaptureState::default();
            for event in events {
                let effects = reducer.reduce(&mut state, event, &env);
                prop_assert!(effects.is_empty());
            }
            prop_assert!(state.history.is_empty());
        }

        #[test]
        fn status_only_moves_forward(events in prop::collection::vec(lifecycle(), 0..80)) {
            let reducer = CaptureReducer::new();
            let env = env();
            let mut state = CaptureState::enabled();
            let mut seen: std::collections::HashMap<RecordId, RecordStatus> = std::collections::HashMap::new();
            for event in events {
                reducer.reduce(&mut state, event, &env);
                for record in state.history.all() {
                    let previous = seen.insert(record.id, record.status);
                    if let Some(RecordStatus::Completed) = previous {
                        prop_assert_eq!(record.status, RecordStatus::Completed);
                    }
                }
            }
        }
    }
}
