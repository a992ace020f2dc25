//! Capture gate.
//!
//! A single boolean decides whether lifecycle events are observed at all. The
//! flag starts disabled, is only changed by an explicit user toggle and is
//! persisted through the settings store. While enabled, only top-level
//! documents and programmatic calls pass.

use crate::events::{LifecycleEvent, ResourceType};
use crate::record::RequestKind;
use serde::{Deserialize, Serialize};

/// Enabled flag plus resource type filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureGate {
    enabled: bool,
}

impl CaptureGate {
    /// Gate with the given initial flag
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Current flag
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the flag. Returns `true` when it changed.
    pub const fn set_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.enabled != enabled;
        self.enabled = enabled;
        changed
    }

    /// Record kind for a resource type, or `None` when the event must be
    /// ignored (capture disabled, or a filtered-out type).
    #[must_use]
    pub const fn admit(&self, resource_type: ResourceType) -> Option<RequestKind> {
        if !self.enabled {
            return None;
        }
        resource_type.capture_kind()
    }

    /// [`admit`](Self::admit) applied to a lifecycle event
    #[must_use]
    pub fn admits<E: LifecycleEvent>(&self, event: &E) -> bool {
        self.admit(event.resource_type()).is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let gate = CaptureGate::default();
        assert!(!gate.is_enabled());
        assert_eq!(gate.admit(ResourceType::MainFrame), None);
        assert_eq!(gate.admit(ResourceType::XmlHttpRequest), None);
    }

    #[test]
    fn enabled_gate_filters_resource_types() {
        let gate = CaptureGate::new(true);
        assert_eq!(
            gate.admit(ResourceType::MainFrame),
            Some(RequestKind::DocumentLoad)
        );
        assert_eq!(
            gate.admit(ResourceType::XmlHttpRequest),
            Some(RequestKind::ScriptCall)
        );
        assert_eq!(gate.admit(ResourceType::Image), None);
        assert_eq!(gate.admit(ResourceType::Stylesheet), None);
        assert_eq!(gate.admit(ResourceType::Script), None);
    }

    #[test]
    fn set_enabled_reports_change() {
        let mut gate = CaptureGate::default();
        assert!(gate.set_enabled(true));
        assert!(!gate.set_enabled(true));
        assert!(gate.set_enabled(false));
        assert!(!gate.is_enabled());
    }
}
