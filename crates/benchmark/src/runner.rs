//! Drives the preset questions through a model session.

use crate::{BenchmarkError, Result};
use llmbench_models::{ModelDownloadState, OnceSlot, Selection};
use llmbench_session::{ModelSession, ModelState, QueryCallbacks};
use std::sync::Arc;

/// Outcome of benchmarking one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub model_name: String,
    /// Questions answered to completion.
    pub answered: usize,
    /// Questions whose generation failed.
    pub failed: usize,
    /// All questions were asked and the benchmark flag was cleared.
    pub finished: bool,
}

pub struct BenchmarkRunner {
    session: ModelSession,
    questions: Vec<String>,
}

impl BenchmarkRunner {
    /// Ask the first `num_messages` of `questions` (fewer if there are not
    /// that many).
    pub fn new(session: ModelSession, questions: Vec<String>, num_messages: usize) -> Result<Self> {
        let mut questions = questions;
        questions.truncate(num_messages);
        if questions.is_empty() {
            tracing::error!(num_messages, "benchmark has no questions");
            return Err(BenchmarkError::NoQuestions);
        }
        Ok(Self { session, questions })
    }

    pub fn session(&self) -> &ModelSession {
        &self.session
    }

    pub fn num_messages(&self) -> usize {
        self.questions.len()
    }

    /// Unload whatever is loaded, load `model` and ask every question in
    /// order, one at a time.
    ///
    /// A failed generation counts as asked so the run always advances. Once
    /// every question has been asked the model's benchmark flag is cleared.
    pub async fn run_model(&self, model: Arc<ModelDownloadState>) -> Result<RunSummary> {
        if !model.is_downloaded() {
            tracing::error!(model = %model.model_name(), "cannot benchmark a model that is not downloaded");
            return Err(BenchmarkError::NotDownloaded(model.model_name().to_string()));
        }

        self.session.unload().await?;
        self.session.set_model(Arc::clone(&model)).await?;
        tracing::info!(model = %model.model_name(), questions = self.questions.len(), "benchmark started");

        let mut summary = RunSummary {
            model_name: model.model_name().to_string(),
            answered: 0,
            failed: 0,
            finished: false,
        };
        let mut state = self.session.subscribe_state();
        let mut message_count = 0;

        while message_count < self.questions.len() {
            if state.wait_for(|s| *s == ModelState::Ready).await.is_err() {
                break;
            }

            let (slot, outcome) = OnceSlot::new();
            let on_finish_slot = Arc::new(slot);
            let on_error_slot = Arc::clone(&on_finish_slot);
            let callbacks = QueryCallbacks {
                on_finish: Some(Box::new(move || {
                    on_finish_slot.settle(Ok(()));
                })),
                on_error: Some(Box::new(move |message| {
                    on_error_slot.settle(Err(message));
                })),
            };

            let question = &self.questions[message_count];
            tracing::debug!(model = %summary.model_name, index = message_count, "asking question");
            self.session.send_user_query(question.clone(), callbacks)?;

            match outcome.await {
                Ok(Ok(())) => summary.answered += 1,
                Ok(Err(message)) => {
                    tracing::warn!(model = %summary.model_name, error = %message, "question failed");
                    summary.failed += 1;
                }
                Err(_) => {
                    tracing::info!(model = %summary.model_name, "benchmark stopped");
                    return Ok(summary);
                }
            }
            message_count += 1;
        }

        if message_count >= self.questions.len() {
            // callbacks fire before the session releases the job
            let _ = state.wait_for(|s| *s != ModelState::Answering).await;
            model.set_selected(Selection::Benchmark, false);
            summary.finished = true;
        }
        tracing::info!(
            model = %summary.model_name,
            answered = summary.answered,
            failed = summary.failed,
            "benchmark finished"
        );
        Ok(summary)
    }

    /// Benchmark every downloaded model flagged for benchmarking, in order,
    /// then unload so the last run's result is captured.
    pub async fn run_selected(&self, models: &[Arc<ModelDownloadState>]) -> Result<Vec<RunSummary>> {
        let selected: Vec<_> = models
            .iter()
            .filter(|m| m.is_selected(Selection::Benchmark) && m.is_downloaded())
            .cloned()
            .collect();

        let mut summaries = Vec::with_capacity(selected.len());
        for model in selected {
            match self.run_model(model).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    self.teardown().await?;
                    return Err(e);
                }
            }
        }

        self.teardown().await?;
        Ok(summaries)
    }

    /// Stop any generation and unload the model.
    pub async fn teardown(&self) -> Result<()> {
        self.session.stop_and_unload().await?;
        Ok(())
    }
}
