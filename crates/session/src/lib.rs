//! Lifecycle of one loaded model: loading, streaming answers, stopping and
//! unloading, with every state transition observable in order.

mod notify;
mod session;
mod state;

pub use notify::forward_transitions;
pub use session::{LoadHook, ModelSession, QueryCallbacks, TRANSITION_CAPACITY};
pub use state::{Message, ModelState, Role, Transition};

use llmbench_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("model {0} is not downloaded")]
    NotDownloaded(String),
    #[error("no model assigned to the session")]
    NoModel,
    #[error("model file missing for {0}")]
    ModelFileMissing(String),
    #[error("session not ready (state {0:?})")]
    NotReady(ModelState),
    #[error("a generation is still running")]
    GenerationActive,
    #[error("failed to load model: {0}")]
    LoadFailed(#[from] EngineError),
}

impl SessionError {
    /// Whether the caller violated an operation's precondition, as opposed
    /// to the engine failing.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, SessionError::LoadFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
