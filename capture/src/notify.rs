//! Notification bus.
//!
//! Best-effort push of history changes to observers (the UI). Delivery is
//! fire-and-forget: a failing or absent observer never affects the operation
//! that published, and never prevents delivery to the other observers.
//! Nothing is queued or retried for observers that attach later.

use crate::record::{RecordId, RequestRecord};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// State change pushed to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notification", rename_all = "camelCase")]
pub enum Notification {
    /// A new record was appended (full payload)
    #[serde(rename_all = "camelCase")]
    RecordAppended {
        /// The appended record
        record: Box<RequestRecord>,
    },
    /// An existing record changed; observers re-fetch it by id
    #[serde(rename_all = "camelCase")]
    RecordChanged {
        /// The changed record
        record_id: RecordId,
    },
}

/// Why a single delivery failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The observer is gone for good; it is detached from the bus
    #[error("observer disconnected")]
    Disconnected,

    /// The observer refused this notification
    #[error("observer rejected notification: {0}")]
    Rejected(String),
}

/// Receiver of notifications.
pub trait Observer: Send + Sync {
    /// Deliver one notification. Must not block.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] when the notification could not be handed
    /// over. The bus logs and drops it.
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Handle returned by [`NotificationBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverList = Vec<(ObserverId, Arc<dyn Observer>)>;

/// Observer list with swallowed per-subscriber failures.
#[derive(Clone, Default)]
pub struct NotificationBus {
    observers: Arc<RwLock<ObserverList>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl NotificationBus {
    /// Bus with no observers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Detach an observer. Returns `false` if it was not attached.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Number of attached observers
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver to every observer. Returns how many accepted it.
    ///
    /// Observers reporting [`DeliveryError::Disconnected`] are detached.
    pub fn publish(&self, notification: &Notification) -> usize {
        let observers: ObserverList = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if observers.is_empty() {
            tracing::trace!("No observer attached, notification dropped");
            return 0;
        }

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, observer) in &observers {
            match observer.deliver(notification) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Disconnected) => {
                    tracing::debug!(observer = ?id, "Observer disconnected, detaching");
                    gone.push(*id);
                },
                Err(error) => {
                    tracing::debug!(observer = ?id, error = %error, "Notification delivery failed");
                },
            }
        }

        if !gone.is_empty() {
            self.observers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| !gone.contains(id));
        }

        delivered
    }
}

/// Observer forwarding into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelObserver {
    /// Observer plus the receiving end of its channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.sender
            .send(notification.clone())
            .map_err(|_| DeliveryError::Disconnected)
    }
}
