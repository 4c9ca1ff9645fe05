use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// System prompt installed into every freshly created engine.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Stream of generated text chunks for one prompt.
pub type ResponseStream = BoxStream<'static, crate::Result<String>>;

/// Sampling parameters an engine is created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub min_p: f32,
    pub temperature: f32,
    pub context_size: u32,
    /// Keep the chat history inside the engine between prompts.
    pub store_chats: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            min_p: 0.05,
            temperature: 1.0,
            context_size: 2048,
            store_chats: false,
        }
    }
}

/// On-device text generation backend.
///
/// One instance is owned by exactly one session. `create` may be called again
/// after `close` to load a different model file.
#[async_trait]
pub trait InferenceEngine: Send {
    /// Load the model at `path`.
    async fn create(&mut self, path: &Path, params: &GenerationParams) -> crate::Result<()>;

    async fn add_system_prompt(&mut self, prompt: &str) -> crate::Result<()>;

    /// Start generating an answer. Dropping the stream abandons generation.
    fn response(&mut self, prompt: &str) -> ResponseStream;

    /// Decode speed of the last completed response, in tokens per second.
    fn generation_speed(&self) -> f32;

    /// Release the loaded model. Safe to call when nothing is loaded.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.min_p, 0.05);
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.context_size, 2048);
        assert!(!params.store_chats);
    }
}
