//! Event bus abstraction for decoupled event emission.
//!
//! The benchmark core publishes through this trait so a UI shell, a CLI or a
//! test can observe it without the core knowing which.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Trait for emitting events to subscribers.
pub trait EventBus: Send + Sync {
    /// Emit an event with a JSON payload.
    ///
    /// # Arguments
    /// * `topic` - Event name/topic (e.g., "session:state_changed")
    /// * `payload` - JSON payload to emit
    fn emit(&self, topic: &str, payload: serde_json::Value);
}

/// Type alias for shared event bus reference.
pub type EventBusRef = Arc<dyn EventBus>;

/// Serialize `event` and emit it. Serialization failures are logged and the
/// event is dropped.
pub fn emit_event<T: Serialize>(bus: &dyn EventBus, topic: &str, event: &T) {
    match serde_json::to_value(event) {
        Ok(payload) => bus.emit(topic, payload),
        Err(e) => tracing::warn!(topic, error = %e, "failed to serialize event"),
    }
}

/// Event bus that keeps everything it is given, in emission order.
///
/// Tests and headless hosts inspect the log afterwards.
#[derive(Default)]
pub struct InMemoryEventBus {
    log: Mutex<Vec<EmittedEvent>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    /// Position in the log, starting at 0.
    pub seq: usize,
    pub topic: String,
    pub payload: serde_json::Value,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<EmittedEvent>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<EmittedEvent> {
        self.log().clone()
    }

    pub fn events_for(&self, topic: &str) -> Vec<EmittedEvent> {
        self.log()
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Topics in emission order, repeats included.
    pub fn topics(&self) -> Vec<String> {
        self.log().iter().map(|e| e.topic.clone()).collect()
    }

    /// Payload of the most recent event on `topic`.
    pub fn latest(&self, topic: &str) -> Option<serde_json::Value> {
        self.log()
            .iter()
            .rev()
            .find(|e| e.topic == topic)
            .map(|e| e.payload.clone())
    }

    pub fn len(&self) -> usize {
        self.log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        let mut log = self.log();
        let seq = log.len();
        tracing::trace!(topic, seq, "event recorded");
        log.push(EmittedEvent {
            seq,
            topic: topic.to_string(),
            payload,
        });
    }
}

/// Drops every event. The default bus when no host is listening.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _topic: &str, _payload: serde_json::Value) {}
}
