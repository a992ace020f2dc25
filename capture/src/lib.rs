//! # Repeater Capture
//!
//! Interception, correlation and replay core of the repeater workflow.
//!
//! The host networking layer reports three lifecycle callbacks per request.
//! A [`CaptureSession`] filters them through the [`CaptureGate`], joins them
//! into one [`RequestRecord`] per logical request and keeps the newest 100
//! records in a [`HistoryStore`]. A user can edit any captured request and
//! resend it; the replay gets its own record, which the response (or the
//! failure) is written into once the call returns. Every change is pushed to
//! attached observers through the [`NotificationBus`].
//!
//! ## Components
//!
//! - [`history`]: bounded, newest-first record storage
//! - [`controller`]: enabled flag and resource type filter
//! - [`correlator`]: url + timestamp join of lifecycle callbacks
//! - [`replay`]: modify-and-resend pipeline
//! - [`notify`]: fire-and-forget observer list
//! - [`reducer`]: all of the above as one reducer over [`CaptureState`]
//! - [`session`]: the facade the host and the UI talk to
//!
//! ## Example
//!
//! ```no_run
//! use repeater_capture::{
//!     CaptureEnvironment, CaptureSession, FileSettings, NotificationBus, ReqwestTransport,
//!     TransportConfig,
//! };
//! use repeater_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let environment = CaptureEnvironment::new(
//!     Arc::new(SystemClock),
//!     Arc::new(ReqwestTransport::new(&TransportConfig::default())?),
//!     Arc::new(FileSettings::new("repeater-settings.json")),
//!     NotificationBus::new(),
//! );
//! let session = CaptureSession::start(environment).await;
//! session.set_intercept_enabled(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod controller;
pub mod correlator;
pub mod error;
pub mod events;
pub mod history;
pub mod notify;
pub mod record;
pub mod reducer;
pub mod replay;
pub mod session;
pub mod settings;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use body::{BodyDescriptor, FormField, RequestBody, UploadChunk};
pub use controller::CaptureGate;
pub use correlator::{Correlation, CorrelationKey};
pub use error::SessionError;
pub use events::{
    HostDirective, LifecycleEvent, RequestHeadersReady, RequestInitiated, ResourceType,
    ResponseHeadersReceived,
};
pub use history::{HISTORY_CAPACITY, HistoryStore};
pub use notify::{ChannelObserver, DeliveryError, Notification, NotificationBus, Observer, ObserverId};
pub use record::{
    Header, HostTimestamp, RecordId, RecordStatus, RequestKind, RequestRecord, StatusClass,
};
pub use reducer::{CaptureEnvironment, CaptureReducer};
pub use replay::{ReplayOutcome, ReplayRequest};
pub use session::{CaptureSession, CaptureStore, ReplayStarted, SessionSnapshot};
pub use settings::{FileSettings, MemorySettings, Settings, SettingsError, SettingsStore};
pub use transport::{
    OutboundRequest, ReplayResponse, ReplayTransport, ReqwestTransport, TransportConfig,
    TransportError,
};
pub use types::{CaptureAction, CaptureState};
