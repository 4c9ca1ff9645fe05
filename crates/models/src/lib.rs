mod catalog;
mod download;
mod once_slot;
mod sequential;
mod state;

use std::io;
use std::path::{Path, PathBuf};

pub use catalog::{ModelLink, ModelSource, HUGGING_FACE_URLS};
pub use download::{HttpTransfer, OfflineTransfer, Transfer, TRANSFER_TIMEOUT};
pub use once_slot::OnceSlot;
pub use sequential::{
    CompleteCallback, DownloadController, DownloadGate, ErrorCallback, ProgressCallback,
    SequentialCallbacks, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL,
};
pub use state::{load_catalog, DownloadStatus, FailCallback, ModelDownloadState, Selection};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid model url: {0}")]
    InvalidUrl(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("download cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Root directory for everything this app stores locally.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llmbench")
}

/// Where finished artifacts live and where in-flight transfers are staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDirs {
    pub models: PathBuf,
    pub temp: PathBuf,
}

impl ModelDirs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            models: root.join("models"),
            temp: root.join("tempModels"),
        }
    }

    pub fn model_file(&self, file_name: &str) -> PathBuf {
        self.models.join(file_name)
    }

    pub fn temp_file(&self, file_name: &str) -> PathBuf {
        self.temp.join(file_name)
    }

    /// Remove leftovers of interrupted transfers.
    pub fn erase_temp(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.temp) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Default for ModelDirs {
    fn default() -> Self {
        Self::new(data_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_layout() {
        let dirs = ModelDirs::new("/data/app");
        assert_eq!(dirs.models, PathBuf::from("/data/app/models"));
        assert_eq!(dirs.temp, PathBuf::from("/data/app/tempModels"));
        assert_eq!(
            dirs.model_file("a.gguf"),
            PathBuf::from("/data/app/models/a.gguf")
        );
    }

    #[test]
    fn test_erase_temp_missing_dir_is_ok() {
        let root = tempfile::tempdir().unwrap();
        let dirs = ModelDirs::new(root.path());
        assert!(dirs.erase_temp().is_ok());

        std::fs::create_dir_all(&dirs.temp).unwrap();
        std::fs::write(dirs.temp_file("x.part"), b"junk").unwrap();
        dirs.erase_temp().unwrap();
        assert!(!dirs.temp.exists());
    }
}
