//! Benchmark orchestration: drive preset questions through a model session,
//! aggregate resource and speed samples into per-model results.

mod aggregator;
mod config;
mod constants;
mod device;
mod notify;
mod questions;
mod repository;
mod result;
mod runner;

pub use aggregator::{ResultAggregator, ResultAggregatorBuilder};
pub use config::BenchmarkConfig;
pub use constants::*;
pub use device::Device;
pub use notify::download_callbacks;
pub use questions::{load_questions, parse_questions, FALLBACK_QUESTIONS};
pub use repository::ResultRepository;
pub use result::{BenchmarkResult, LlmModel};
pub use runner::{BenchmarkRunner, RunSummary};

use llmbench_session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("model {0} is not downloaded")]
    NotDownloaded(String),
    #[error("no questions to ask")]
    NoQuestions,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl BenchmarkError {
    /// Whether the caller violated a precondition rather than hitting a
    /// runtime failure.
    pub fn is_precondition(&self) -> bool {
        match self {
            BenchmarkError::Session(e) => e.is_precondition(),
            BenchmarkError::NotDownloaded(_) | BenchmarkError::NoQuestions => true,
            BenchmarkError::Io(_) | BenchmarkError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchmarkError>;
