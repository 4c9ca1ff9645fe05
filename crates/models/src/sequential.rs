//! Downloads a selection of models one after another.

use crate::once_slot::OnceSlot;
use crate::state::{DownloadStatus, ModelDownloadState, Selection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the controller looks at the current model's status.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shorter poll intervals, zero included, are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;
pub type CompleteCallback = Box<dyn FnOnce() + Send>;
pub type ErrorCallback = Box<dyn FnOnce(Arc<ModelDownloadState>) + Send>;

#[derive(Default)]
pub struct SequentialCallbacks {
    /// Overall progress in `[0, 1]`, never decreasing.
    pub on_progress: Option<ProgressCallback>,
    /// All candidates are downloaded. Not called after an interrupt.
    pub on_complete: Option<CompleteCallback>,
    /// The named model failed; the remaining ones were not started.
    pub on_error: Option<ErrorCallback>,
}

/// Owns one sequential download run.
///
/// Dropping the controller interrupts the run.
pub struct DownloadController {
    cancel: CancellationToken,
    interrupted: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadController {
    /// Download every model flagged for `selection` that is not downloaded
    /// yet, in list order. Must be called from within a tokio runtime.
    pub fn start(
        models: &[Arc<ModelDownloadState>],
        selection: Selection,
        callbacks: SequentialCallbacks,
    ) -> Self {
        Self::start_with_interval(models, selection, callbacks, DEFAULT_POLL_INTERVAL)
    }

    pub fn start_with_interval(
        models: &[Arc<ModelDownloadState>],
        selection: Selection,
        mut callbacks: SequentialCallbacks,
        poll_interval: Duration,
    ) -> Self {
        let candidates: Vec<_> = models
            .iter()
            .filter(|m| m.is_selected(selection) && !m.is_downloaded())
            .cloned()
            .collect();

        let controller = Self {
            cancel: CancellationToken::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        };

        if candidates.is_empty() {
            tracing::debug!(?selection, "nothing to download");
            if let Some(on_complete) = callbacks.on_complete.take() {
                on_complete();
            }
            return controller;
        }

        tracing::info!(?selection, count = candidates.len(), "sequential download started");
        let run = SequentialRun {
            models: candidates,
            on_complete: callbacks.on_complete,
            on_error: callbacks.on_error,
            reporter: ProgressReporter {
                on_progress: callbacks.on_progress,
                interrupted: Arc::clone(&controller.interrupted),
                reported: Mutex::new(0.0),
            },
            cancel: controller.cancel.child_token(),
            interrupted: Arc::clone(&controller.interrupted),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        };
        let handle = tokio::spawn(run.execute());
        *controller.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        controller
    }

    /// Stop the run, cancel the in-flight transfer and wait for the worker
    /// to exit. Safe to call repeatedly or when nothing is running.
    pub async fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.cancel.cancel();

        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "download controller task ended abnormally");
            }
            tracing::info!("sequential download interrupted");
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Wait for the run to finish on its own.
    pub async fn join(&self) {
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "download controller task ended abnormally");
            }
        }
    }
}

impl Drop for DownloadController {
    fn drop(&mut self) {
        self.interrupted.store(true, Ordering::Release);
        self.cancel.cancel();
    }
}

struct SequentialRun {
    models: Vec<Arc<ModelDownloadState>>,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
    reporter: ProgressReporter,
    cancel: CancellationToken,
    interrupted: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl SequentialRun {
    async fn execute(mut self) {
        let total = self.models.len();
        let mut completed = 0usize;

        for model in std::mem::take(&mut self.models) {
            if self.cancel.is_cancelled() {
                return;
            }
            if model.is_downloaded() {
                completed += 1;
                self.reporter.report(completed as f32 / total as f32);
                continue;
            }

            let (slot, outcome) = OnceSlot::new();
            let slot = Arc::new(slot);
            let fail_slot = Arc::clone(&slot);
            model.download(Some(Box::new(move || {
                fail_slot.settle(false);
            })));

            let monitor = monitor(
                &model,
                &slot,
                &self.reporter,
                self.poll_interval,
                completed,
                total,
            );
            let succeeded = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    model.cancel_download().await;
                    return;
                }
                (_, outcome) = async { tokio::join!(monitor, outcome) } => outcome.unwrap_or(false),
            };

            if !succeeded {
                if self.interrupted.load(Ordering::Acquire) {
                    return;
                }
                tracing::warn!(model = %model.model_name(), "sequential download halted on failure");
                if let Some(on_error) = self.on_error.take() {
                    on_error(Arc::clone(&model));
                }
                return;
            }

            completed += 1;
            self.reporter.report(completed as f32 / total as f32);
        }

        if self.interrupted.load(Ordering::Acquire) {
            return;
        }
        tracing::info!(count = total, "sequential download complete");
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
    }
}

async fn monitor(
    model: &ModelDownloadState,
    slot: &OnceSlot<bool>,
    reporter: &ProgressReporter,
    poll_interval: Duration,
    completed: usize,
    total: usize,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        if slot.is_settled() {
            return;
        }

        let status = model.status();
        reporter.report((completed as f32 + model.progress()) / total as f32);

        match status {
            DownloadStatus::Downloading => {}
            DownloadStatus::Downloaded => {
                slot.settle(true);
                return;
            }
            DownloadStatus::Failed | DownloadStatus::NotStarted => {
                slot.settle(false);
                return;
            }
        }
    }
}

/// Forwards overall progress, clamped and never decreasing, until the run
/// is interrupted.
struct ProgressReporter {
    on_progress: Option<ProgressCallback>,
    interrupted: Arc<AtomicBool>,
    reported: Mutex<f32>,
}

impl ProgressReporter {
    fn report(&self, overall: f32) {
        if self.interrupted.load(Ordering::Acquire) {
            return;
        }
        let Some(on_progress) = &self.on_progress else {
            return;
        };

        let overall = overall.clamp(0.0, 1.0);
        let mut reported = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        if overall > *reported {
            *reported = overall;
            drop(reported);
            tracing::debug!(progress = overall, "sequential download progress");
            on_progress(overall);
        }
    }
}

/// Readiness of the benchmark selection, as shown before a run starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownloadGate {
    NoModelSelected,
    NotStarted,
    /// Overall fraction of the selection that is on disk.
    Progress(f32),
    Finished,
}

impl DownloadGate {
    pub fn evaluate(
        models: &[Arc<ModelDownloadState>],
        selection: Selection,
        controller_active: bool,
    ) -> Self {
        let selected: Vec<_> = models.iter().filter(|m| m.is_selected(selection)).collect();
        if selected.is_empty() {
            return Self::NoModelSelected;
        }
        if selected.iter().all(|m| m.is_downloaded()) {
            return Self::Finished;
        }
        if !controller_active {
            return Self::NotStarted;
        }

        let done: f32 = selected
            .iter()
            .map(|m| match m.status() {
                DownloadStatus::Downloaded => 1.0,
                DownloadStatus::Downloading => m.progress(),
                _ => 0.0,
            })
            .sum();
        Self::Progress((done / selected.len() as f32).clamp(0.0, 1.0))
    }
}
