use crate::constants::{CONFIG_FILE_NAME, DEFAULT_NUM_MESSAGES, QUESTIONS_FILE_NAME, RESULTS_DB_FILE_NAME};
use llmbench_engine::{GenerationParams, SYSTEM_PROMPT};
use llmbench_models::{data_dir, ModelDirs, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
use llmbench_monitor::SamplingIntervals;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables of a benchmark host, read from a JSON file.
///
/// Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Questions asked per model, clamped to the questions available.
    pub num_messages: usize,
    /// Dataset override; defaults to `qa_dataset.txt` in the data directory.
    pub questions_file: Option<PathBuf>,
    pub sampling: SamplingIntervals,
    pub download_poll_interval_ms: u64,
    pub generation: GenerationParams,
    pub system_prompt: String,
    /// Root holding `models/` and `tempModels/`; defaults to the data
    /// directory.
    pub models_root: Option<PathBuf>,
    /// Attach the device descriptor to every result.
    pub attach_device: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            num_messages: DEFAULT_NUM_MESSAGES,
            questions_file: None,
            sampling: SamplingIntervals::default(),
            download_poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            generation: GenerationParams::default(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            models_root: None,
            attach_device: true,
        }
    }
}

impl BenchmarkConfig {
    pub fn default_path() -> PathBuf {
        data_dir().join(CONFIG_FILE_NAME)
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        tracing::debug!(path = ?path, "config loaded");
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> crate::Result<Self> {
        match Self::load(path) {
            Err(crate::BenchmarkError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = ?path, "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn model_dirs(&self) -> ModelDirs {
        match &self.models_root {
            Some(root) => ModelDirs::new(root),
            None => ModelDirs::default(),
        }
    }

    pub fn questions_path(&self) -> PathBuf {
        self.questions_file
            .clone()
            .unwrap_or_else(|| data_dir().join(QUESTIONS_FILE_NAME))
    }

    pub fn results_db_path(&self) -> PathBuf {
        data_dir().join(RESULTS_DB_FILE_NAME)
    }

    pub fn download_poll_interval(&self) -> Duration {
        Duration::from_millis(self.download_poll_interval_ms).max(MIN_POLL_INTERVAL)
    }
}
