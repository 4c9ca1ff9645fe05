//! Shared event contracts between the benchmark core and its observers.
//!
//! This crate defines the DTOs for events the core publishes. Using shared
//! types prevents runtime deserialization errors from mismatched field names
//! on the consuming side.
//!
//! Also provides the `EventBus` trait for decoupled event emission.

mod bus;

pub use bus::{emit_event, EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};

use serde::{Deserialize, Serialize};

/// Event emitted on every model session state transition.
///
/// Producers: session notifier
/// Consumers: frontend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStateChangedEvent {
    /// New state, snake_case (`not_loaded`, `loading`, `answering`, ...).
    pub state: String,
    /// Model assigned to the session, if any.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Number of messages in the transcript at the time of the transition.
    #[serde(default)]
    pub message_count: usize,
}

/// Event emitted while a sequential download makes progress.
///
/// Producers: download controller callbacks
/// Consumers: frontend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgressEvent {
    /// Overall progress in `[0, 1]`.
    pub progress: f32,
}

/// Event emitted when a model download fails and the sequence halts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadFailedEvent {
    pub model_name: String,
}

/// Event emitted when a benchmark result has been aggregated.
///
/// Producers: result aggregator
/// Consumers: frontend, result storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResultEvent {
    pub model_name: String,
    /// Serialized result record.
    pub result: serde_json::Value,
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Session state transition.
    pub const MODEL_STATE_CHANGED: &str = "session:state_changed";
    /// Sequential download progress.
    pub const DOWNLOAD_PROGRESS: &str = "models:download_progress";
    /// Sequential download halted on a failure.
    pub const DOWNLOAD_FAILED: &str = "models:download_failed";
    /// All selected models are downloaded.
    pub const DOWNLOAD_COMPLETE: &str = "models:download_complete";
    /// A benchmark result was produced.
    pub const BENCHMARK_RESULT: &str = "benchmark:result";
    /// The result list was cleared.
    pub const BENCHMARK_RESULTS_RESET: &str = "benchmark:results_reset";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_changed_deserialize() {
        let json = r#"{"state": "answering", "model_name": "SmolLM-360M.Q8_0", "message_count": 3}"#;
        let event: ModelStateChangedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.state, "answering");
        assert_eq!(event.model_name.as_deref(), Some("SmolLM-360M.Q8_0"));
        assert_eq!(event.message_count, 3);
    }

    #[test]
    fn test_state_changed_deserialize_minimal() {
        let json = r#"{"state": "not_loaded"}"#;
        let event: ModelStateChangedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.model_name, None);
        assert_eq!(event.message_count, 0);
    }
}
