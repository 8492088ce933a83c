//! Events attached to local records.
//!
//! The engine has no user interface of its own. Where a failing record is
//! identifiable it attaches an event to it through an [`EventRecorder`]; the
//! embedder decides where those go (an events API, a log, a test buffer).

use crate::registry::RecordType;
use parking_lot::Mutex;
use tracing::{info, warn};

/// Reason used when a reconciliation attempt failed and will be retried.
pub const REASON_FAILED: &str = "ReflectionFailed";

/// Reason used when the engine refuses to touch a remote record it does not own.
pub const REASON_DISABLED: &str = "ReflectionDisabled";

/// Message attached to [`REASON_DISABLED`] events.
pub const MESSAGE_FOREIGN_REMOTE: &str = "remote already exists and is not managed by us";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// The record an event is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub resource: RecordType,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub object: ObjectRef,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl Event {
    pub fn warning(object: ObjectRef, reason: &str, message: impl Into<String>) -> Self {
        Self {
            object,
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// Sink for record events. Must not block.
pub trait EventRecorder: Send + Sync + 'static {
    fn record(&self, event: Event);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        let object = &event.object;
        match event.event_type {
            EventType::Normal => info!(
                resource = %object.resource,
                namespace = %object.namespace,
                name = %object.name,
                reason = %event.reason,
                "{}", event.message
            ),
            EventType::Warning => warn!(
                resource = %object.resource,
                namespace = %object.namespace,
                name = %object.name,
                reason = %event.reason,
                "{}", event.message
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingRecorder {
    events: Mutex<Vec<Event>>,
}

impl CollectingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Events with the given reason.
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventRecorder for CollectingRecorder {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> ObjectRef {
        ObjectRef {
            resource: RecordType::new("core.crd-replicator.io", "v1alpha1", "tenants"),
            namespace: "ns".to_string(),
            name: "a".to_string(),
        }
    }

    #[test]
    fn test_collecting_recorder() {
        let recorder = CollectingRecorder::new();
        recorder.record(Event::warning(object(), REASON_FAILED, "boom"));
        recorder.record(Event::warning(object(), REASON_DISABLED, MESSAGE_FOREIGN_REMOTE));

        assert_eq!(recorder.events().len(), 2);
        let disabled = recorder.with_reason(REASON_DISABLED);
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].event_type, EventType::Warning);
        assert_eq!(disabled[0].message, MESSAGE_FOREIGN_REMOTE);

        recorder.clear();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_tracing_recorder_does_not_panic() {
        TracingRecorder.record(Event::warning(object(), REASON_FAILED, "boom"));
        TracingRecorder.record(Event {
            event_type: EventType::Normal,
            ..Event::warning(object(), "Synced", "ok")
        });
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::Normal.to_string(), "Normal");
        assert_eq!(EventType::Warning.to_string(), "Warning");
    }
}
