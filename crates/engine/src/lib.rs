mod engine;
mod scripted;

pub use engine::{GenerationParams, InferenceEngine, ResponseStream, SYSTEM_PROMPT};
pub use scripted::{ScriptedEngine, ScriptedEngineProbe};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine not created")]
    NotCreated,
    #[error("failed to create engine: {0}")]
    CreateFailed(String),
    #[error("generation failed: {0}")]
    GenerationFailed(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
