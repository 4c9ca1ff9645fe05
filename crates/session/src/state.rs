use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    NotLoaded,
    Loading,
    Answering,
    Ready,
    Stopping,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelState::NotLoaded => "not_loaded",
            ModelState::Loading => "loading",
            ModelState::Answering => "answering",
            ModelState::Ready => "ready",
            ModelState::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    App,
}

/// One entry of the chat transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub text: String,
    pub role: Role,
    /// Tokens per second, stamped when the answer stream completes.
    pub decode_speed: Option<f32>,
    /// Latency from the prompt to the first chunk.
    pub prefill: Option<Duration>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::User,
            decode_speed: None,
            prefill: None,
        }
    }

    pub fn app(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::App,
            decode_speed: None,
            prefill: None,
        }
    }
}

/// A session state change, delivered to subscribers in the order the
/// changes happened.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: ModelState,
    pub model_name: Option<String>,
    /// Transcript at the moment of the change.
    pub messages: Vec<Message>,
}
