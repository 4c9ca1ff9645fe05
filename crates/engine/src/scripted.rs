//! Deterministic engine that replays canned chunks.
//!
//! Used by tests and the demo binary in place of a real on-device backend.

use crate::engine::{GenerationParams, InferenceEngine, ResponseStream};
use crate::EngineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Record {
    created: Vec<PathBuf>,
    system_prompts: Vec<String>,
    prompts: Vec<String>,
    closes: usize,
}

/// Read-only view of what a [`ScriptedEngine`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngineProbe {
    record: Arc<Mutex<Record>>,
}

impl ScriptedEngineProbe {
    fn locked(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Model files passed to `create`, in order.
    pub fn created(&self) -> Vec<PathBuf> {
        self.locked().created.clone()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        self.locked().system_prompts.clone()
    }

    /// Prompts passed to `response`, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.locked().prompts.clone()
    }

    pub fn closes(&self) -> usize {
        self.locked().closes
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    chunks: Vec<String>,
    chunk_delay: Duration,
    speed: f32,
    fail_create: bool,
    fail_after: Option<usize>,
    loaded: bool,
    probe: ScriptedEngineProbe,
}

impl ScriptedEngine {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            chunk_delay: Duration::from_millis(20),
            speed: 12.5,
            fail_create: false,
            fail_after: None,
            loaded: false,
            probe: ScriptedEngineProbe::default(),
        }
    }

    /// Delay before each chunk is yielded.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Value reported by `generation_speed`.
    pub fn with_speed(mut self, tokens_per_second: f32) -> Self {
        self.speed = tokens_per_second;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Yield `chunks` chunks, then fail the stream.
    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn probe(&self) -> ScriptedEngineProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn create(&mut self, path: &Path, _params: &GenerationParams) -> crate::Result<()> {
        self.probe.locked().created.push(path.to_path_buf());
        if self.fail_create {
            tracing::warn!(path = ?path, "scripted engine refused to load");
            return Err(EngineError::CreateFailed(format!("cannot load {}", path.display())));
        }
        self.loaded = true;
        tracing::debug!(path = ?path, chunks = self.chunks.len(), "scripted engine created");
        Ok(())
    }

    async fn add_system_prompt(&mut self, prompt: &str) -> crate::Result<()> {
        if !self.loaded {
            return Err(EngineError::NotCreated);
        }
        self.probe.locked().system_prompts.push(prompt.to_string());
        Ok(())
    }

    fn response(&mut self, prompt: &str) -> ResponseStream {
        self.probe.locked().prompts.push(prompt.to_string());
        if !self.loaded {
            return Box::pin(futures::stream::once(async { Err(EngineError::NotCreated) }));
        }

        let delay = self.chunk_delay;
        let fail_after = self.fail_after;
        let chunks = self.chunks.clone();
        let stream = futures::stream::unfold(0usize, move |i| {
            let chunk = chunks.get(i).cloned();
            async move {
                if fail_after == Some(i) {
                    tokio::time::sleep(delay).await;
                    return Some((Err(EngineError::GenerationFailed("decode error".into())), usize::MAX));
                }
                let chunk = chunk?;
                tokio::time::sleep(delay).await;
                Some((Ok(chunk), i + 1))
            }
        });
        Box::pin(stream)
    }

    fn generation_speed(&self) -> f32 {
        self.speed
    }

    fn close(&mut self) {
        if self.loaded {
            tracing::debug!("scripted engine closed");
        }
        self.loaded = false;
        self.probe.locked().closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SYSTEM_PROMPT;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn test_replays_chunks_in_order() {
        let mut engine = ScriptedEngine::new(["Hel", "lo"]);
        let probe = engine.probe();
        engine
            .create(Path::new("/m/a.gguf"), &GenerationParams::default())
            .await
            .unwrap();
        engine.add_system_prompt(SYSTEM_PROMPT).await.unwrap();

        let chunks: Vec<_> = engine.response("hi").collect().await;
        let text: String = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(text, "Hello");
        assert_eq!(probe.prompts(), vec!["hi"]);
        assert_eq!(probe.system_prompts(), vec![SYSTEM_PROMPT]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_after_configured_chunks() {
        let mut engine = ScriptedEngine::new(["a", "b", "c"]).failing_after(1);
        engine
            .create(Path::new("/m/a.gguf"), &GenerationParams::default())
            .await
            .unwrap();

        let chunks: Vec<_> = engine.response("hi").collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(EngineError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn test_response_before_create_errors() {
        let mut engine = ScriptedEngine::new(["a"]);
        let chunks: Vec<_> = engine.response("hi").collect().await;
        assert!(matches!(chunks.as_slice(), [Err(EngineError::NotCreated)]));
    }

    #[tokio::test]
    async fn test_failing_create() {
        let mut engine = ScriptedEngine::new(["a"]).failing_create();
        let err = engine
            .create(Path::new("/m/a.gguf"), &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CreateFailed(_)));
    }

    #[tokio::test]
    async fn test_close_unloads() {
        let mut engine = ScriptedEngine::new(["a"]);
        let probe = engine.probe();
        engine
            .create(Path::new("/m/a.gguf"), &GenerationParams::default())
            .await
            .unwrap();
        engine.close();
        engine.close();

        assert_eq!(probe.closes(), 2);
        let chunks: Vec<_> = engine.response("hi").collect().await;
        assert!(matches!(chunks.as_slice(), [Err(EngineError::NotCreated)]));
    }
}
