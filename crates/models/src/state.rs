//! Download state of a single catalog entry.

use crate::catalog::{ModelSource, HUGGING_FACE_URLS};
use crate::download::Transfer;
use crate::{ModelDirs, ModelError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Minimum time between two published progress values.
const PROGRESS_THROTTLE: Duration = Duration::from_millis(100);
/// Progress jumps at least this large are published immediately.
const PROGRESS_STEP: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    NotStarted,
    Downloading,
    Downloaded,
    Failed,
}

/// The two independent reasons a model can be picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Chat,
    Benchmark,
}

/// Invoked once when a transfer ends in failure (not on cancellation).
pub type FailCallback = Box<dyn FnOnce() + Send>;

struct DownloadJob {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ProgressThrottle {
    last_at: Option<Instant>,
    last_value: f32,
}

/// A catalog model together with its local download state.
///
/// The file in the models directory is the source of truth: a state built
/// while the file exists starts out as [`DownloadStatus::Downloaded`].
pub struct ModelDownloadState {
    source: ModelSource,
    dirs: ModelDirs,
    transfer: Arc<dyn Transfer>,
    status: watch::Sender<DownloadStatus>,
    progress: watch::Sender<f32>,
    file: Mutex<Option<PathBuf>>,
    selected_for_chat: AtomicBool,
    selected_for_benchmark: AtomicBool,
    job: Mutex<Option<DownloadJob>>,
    next_job_id: AtomicU64,
    throttle: Mutex<ProgressThrottle>,
}

impl std::fmt::Debug for ModelDownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDownloadState")
            .field("model", &self.source.model_name)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .finish()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ModelDownloadState {
    pub fn new(source: ModelSource, dirs: ModelDirs, transfer: Arc<dyn Transfer>) -> Arc<Self> {
        let file = Some(dirs.model_file(&source.file_name)).filter(|p| p.is_file());
        let (status, progress) = if file.is_some() {
            (DownloadStatus::Downloaded, 1.0)
        } else {
            (DownloadStatus::NotStarted, 0.0)
        };

        Arc::new(Self {
            source,
            dirs,
            transfer,
            status: watch::Sender::new(status),
            progress: watch::Sender::new(progress),
            file: Mutex::new(file),
            selected_for_chat: AtomicBool::new(false),
            selected_for_benchmark: AtomicBool::new(false),
            job: Mutex::new(None),
            next_job_id: AtomicU64::new(0),
            throttle: Mutex::new(ProgressThrottle {
                last_at: None,
                last_value: 0.0,
            }),
        })
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn model_name(&self) -> &str {
        &self.source.model_name
    }

    pub fn file_name(&self) -> &str {
        &self.source.file_name
    }

    pub fn status(&self) -> DownloadStatus {
        *self.status.borrow()
    }

    pub fn is_downloaded(&self) -> bool {
        self.status() == DownloadStatus::Downloaded
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DownloadStatus> {
        self.status.subscribe()
    }

    pub fn progress(&self) -> f32 {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<f32> {
        self.progress.subscribe()
    }

    /// Resolved local file, present once the model is downloaded.
    pub fn file(&self) -> Option<PathBuf> {
        locked(&self.file).clone()
    }

    pub fn is_selected(&self, selection: Selection) -> bool {
        self.flag(selection).load(Ordering::Acquire)
    }

    pub fn set_selected(&self, selection: Selection, selected: bool) {
        self.flag(selection).store(selected, Ordering::Release);
    }

    fn flag(&self, selection: Selection) -> &AtomicBool {
        match selection {
            Selection::Chat => &self.selected_for_chat,
            Selection::Benchmark => &self.selected_for_benchmark,
        }
    }

    /// Start downloading in the background.
    ///
    /// A no-op returning `false` when the model is already downloading or
    /// downloaded. Must be called from within a tokio runtime.
    pub fn download(self: &Arc<Self>, on_fail: Option<FailCallback>) -> bool {
        let mut job = locked(&self.job);

        let started = self.status.send_if_modified(|status| match status {
            DownloadStatus::Downloading | DownloadStatus::Downloaded => false,
            _ => {
                *status = DownloadStatus::Downloading;
                true
            }
        });
        if !started {
            tracing::debug!(model = %self.model_name(), "download already running or finished");
            return false;
        }

        self.progress.send_replace(0.0);
        *locked(&self.throttle) = ProgressThrottle {
            last_at: None,
            last_value: 0.0,
        };

        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run_download(id, token, on_fail).await });

        *job = Some(DownloadJob { id, cancel, handle });
        tracing::info!(model = %self.model_name(), url = %self.source.url, "download started");
        true
    }

    async fn run_download(self: Arc<Self>, id: u64, cancel: CancellationToken, on_fail: Option<FailCallback>) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ModelError::Cancelled),
            res = self.fetch_into_models_dir(&cancel) => res,
        };

        match outcome {
            Ok(path) => {
                tracing::info!(model = %self.model_name(), path = ?path, "download finished");
                *locked(&self.file) = Some(path);
                self.status.send_replace(DownloadStatus::Downloaded);
                self.progress.send_replace(1.0);
            }
            Err(ModelError::Cancelled) => {
                // cancel_download owns the reset
                tracing::debug!(model = %self.model_name(), "download task cancelled");
            }
            Err(e) => {
                tracing::warn!(model = %self.model_name(), error = %e, "download failed");
                self.mark_failed();
                if let Some(on_fail) = on_fail {
                    on_fail();
                }
            }
        }

        let mut job = locked(&self.job);
        if job.as_ref().is_some_and(|j| j.id == id) {
            *job = None;
        }
    }

    async fn fetch_into_models_dir(&self, cancel: &CancellationToken) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dirs.temp).await?;
        tokio::fs::create_dir_all(&self.dirs.models).await?;

        let temp = self.dirs.temp_file(self.file_name());
        self.transfer
            .fetch(&self.source.url, &temp, cancel, &|fraction| {
                self.publish_progress(fraction)
            })
            .await?;

        let dest = self.dirs.model_file(self.file_name());
        tokio::fs::rename(&temp, &dest)
            .await
            .map_err(|e| ModelError::DownloadFailed(format!("failed to move {:?}: {e}", temp)))?;
        Ok(dest)
    }

    fn publish_progress(&self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        let now = Instant::now();
        let mut throttle = locked(&self.throttle);

        let due = throttle
            .last_at
            .map_or(true, |at| now.duration_since(at) >= PROGRESS_THROTTLE);
        if due || fraction >= throttle.last_value + PROGRESS_STEP {
            throttle.last_at = Some(now);
            throttle.last_value = fraction;
            self.progress.send_replace(fraction);
        }
    }

    fn mark_failed(&self) {
        self.status.send_replace(DownloadStatus::Failed);
        self.erase_temp_file();
        self.progress.send_replace(0.0);
        *locked(&self.file) = None;
    }

    fn erase_temp_file(&self) {
        let temp = self.dirs.temp_file(self.file_name());
        if temp.exists() {
            if let Err(e) = std::fs::remove_file(&temp) {
                tracing::warn!(path = ?temp, error = %e, "failed to erase temp file");
            }
        }
    }

    /// Cancel a running download and wait for its task to stop.
    ///
    /// Returns `false` if nothing was downloading.
    pub async fn cancel_download(&self) -> bool {
        if self.status() != DownloadStatus::Downloading {
            return false;
        }
        let Some(job) = locked(&self.job).take() else {
            return false;
        };

        job.cancel.cancel();
        if let Err(e) = job.handle.await {
            tracing::warn!(model = %self.model_name(), error = %e, "download task ended abnormally");
        }
        if self.status() != DownloadStatus::Downloading {
            // the transfer settled before the cancellation was observed
            return false;
        }

        self.status.send_replace(DownloadStatus::NotStarted);
        self.progress.send_replace(0.0);
        self.erase_temp_file();
        tracing::info!(model = %self.model_name(), "download cancelled");
        true
    }

    /// Delete the downloaded file. Returns `false` if there was none.
    pub fn delete(&self) -> Result<bool> {
        let mut file = locked(&self.file);
        let Some(path) = file.as_ref() else {
            return Ok(false);
        };

        std::fs::remove_file(path)?;
        tracing::info!(model = %self.model_name(), path = ?path, "model deleted");
        *file = None;
        drop(file);

        self.progress.send_replace(0.0);
        self.status.send_replace(DownloadStatus::NotStarted);
        Ok(true)
    }
}

/// Build the download state of every catalog model.
///
/// Temp files left by a previous run are erased first.
pub fn load_catalog(dirs: &ModelDirs, transfer: Arc<dyn Transfer>) -> Result<Vec<Arc<ModelDownloadState>>> {
    dirs.erase_temp()?;

    HUGGING_FACE_URLS
        .iter()
        .map(|url| {
            let source = ModelSource::from_hugging_face_url(url)?;
            Ok(ModelDownloadState::new(source, dirs.clone(), Arc::clone(&transfer)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;

    struct FileTransfer {
        payload: &'static [u8],
        fail: bool,
        step: Duration,
    }

    #[async_trait]
    impl Transfer for FileTransfer {
        async fn fetch(
            &self,
            _url: &str,
            dest: &Path,
            cancel: &CancellationToken,
            on_progress: &(dyn Fn(f32) + Send + Sync),
        ) -> Result<u64> {
            tokio::fs::write(dest, b"").await?;
            for i in 1..=4 {
                if cancel.is_cancelled() {
                    return Err(ModelError::Cancelled);
                }
                tokio::time::sleep(self.step).await;
                on_progress(i as f32 / 4.0);
            }
            if self.fail {
                return Err(ModelError::DownloadFailed("HTTP 500".to_string()));
            }
            tokio::fs::write(dest, self.payload).await?;
            Ok(self.payload.len() as u64)
        }
    }

    fn state(root: &Path, fail: bool) -> Arc<ModelDownloadState> {
        let source = ModelSource::from_hugging_face_url(HUGGING_FACE_URLS[0]).unwrap();
        let transfer = Arc::new(FileTransfer {
            payload: b"GGUF",
            fail,
            step: Duration::from_millis(50),
        });
        ModelDownloadState::new(source, ModelDirs::new(root), transfer)
    }

    async fn wait_for_terminal(model: &ModelDownloadState) -> DownloadStatus {
        let mut rx = model.subscribe_status();
        let status = *rx
            .wait_for(|s| *s != DownloadStatus::Downloading)
            .await
            .unwrap();
        status
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_moves_file_into_models_dir() {
        let root = tempfile::tempdir().unwrap();
        let model = state(root.path(), false);
        assert_eq!(model.status(), DownloadStatus::NotStarted);

        assert!(model.download(None));
        assert_eq!(model.status(), DownloadStatus::Downloading);

        assert_eq!(wait_for_terminal(&model).await, DownloadStatus::Downloaded);
        let file = model.file().unwrap();
        assert_eq!(file, root.path().join("models").join(model.file_name()));
        assert_eq!(std::fs::read(&file).unwrap(), b"GGUF");
        assert_eq!(model.progress(), 1.0);
        assert!(!root.path().join("tempModels").join(model.file_name()).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_file_marks_downloaded() {
        let root = tempfile::tempdir().unwrap();
        let dirs = ModelDirs::new(root.path());
        std::fs::create_dir_all(&dirs.models).unwrap();
        let source = ModelSource::from_hugging_face_url(HUGGING_FACE_URLS[0]).unwrap();
        std::fs::write(dirs.model_file(&source.file_name), b"GGUF").unwrap();

        let model = state(root.path(), false);
        assert!(model.is_downloaded());
        assert_eq!(model.progress(), 1.0);
        assert!(!model.download(None), "downloaded model must not restart");
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_twice_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let model = state(root.path(), false);
        assert!(model.download(None));
        assert!(!model.download(None));
        assert_eq!(wait_for_terminal(&model).await, DownloadStatus::Downloaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_invokes_callback_and_resets() {
        let root = tempfile::tempdir().unwrap();
        let model = state(root.path(), true);

        let (tx, rx) = tokio::sync::oneshot::channel();
        model.download(Some(Box::new(move || {
            let _ = tx.send(());
        })));

        rx.await.unwrap();
        assert_eq!(model.status(), DownloadStatus::Failed);
        assert_eq!(model.progress(), 0.0);
        assert!(model.file().is_none());
        assert!(!root.path().join("tempModels").join(model.file_name()).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_download_resets_state() {
        let root = tempfile::tempdir().unwrap();
        let model = state(root.path(), false);
        model.download(None);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(model.cancel_download().await);
        assert_eq!(model.status(), DownloadStatus::NotStarted);
        assert_eq!(model.progress(), 0.0);
        assert!(model.file().is_none());
        assert!(!model.cancel_download().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_file() {
        let root = tempfile::tempdir().unwrap();
        let model = state(root.path(), false);
        model.download(None);
        wait_for_terminal(&model).await;

        let file = model.file().unwrap();
        assert!(model.delete().unwrap());
        assert!(!file.exists());
        assert_eq!(model.status(), DownloadStatus::NotStarted);
        assert!(!model.delete().unwrap());
    }

    #[test]
    fn test_selection_flags_are_independent() {
        let root = tempfile::tempdir().unwrap();
        let model = state(root.path(), false);
        model.set_selected(Selection::Benchmark, true);
        assert!(model.is_selected(Selection::Benchmark));
        assert!(!model.is_selected(Selection::Chat));
    }

    #[test]
    fn test_load_catalog_erases_temp() {
        let root = tempfile::tempdir().unwrap();
        let dirs = ModelDirs::new(root.path());
        std::fs::create_dir_all(&dirs.temp).unwrap();
        std::fs::write(dirs.temp_file("stale.gguf"), b"x").unwrap();

        let transfer: Arc<dyn Transfer> = Arc::new(FileTransfer {
            payload: b"",
            fail: false,
            step: Duration::ZERO,
        });
        let models = load_catalog(&dirs, transfer).unwrap();
        assert_eq!(models.len(), HUGGING_FACE_URLS.len());
        assert!(!dirs.temp.exists());
    }
}
