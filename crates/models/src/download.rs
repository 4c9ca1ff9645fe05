use crate::{ModelError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Connect and read timeout for model transfers.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte-level transfer of one remote artifact to a local file.
///
/// Implementations report progress as a fraction in `[0, 1]` (or `0` while
/// the total size is unknown) and must stop promptly once `cancel` fires.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<u64>;
}

/// Transfer for hosts without network access: every fetch fails.
///
/// Models already present in the models directory stay usable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTransfer;

#[async_trait]
impl Transfer for OfflineTransfer {
    async fn fetch(
        &self,
        url: &str,
        _dest: &Path,
        _cancel: &CancellationToken,
        _on_progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<u64> {
        Err(ModelError::DownloadFailed(format!("offline: {url}")))
    }
}

/// HTTP transfer streaming the response body straight to disk.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: reqwest::Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(TRANSFER_TIMEOUT)
            .read_timeout(TRANSFER_TIMEOUT)
            .build()
            .map_err(|e| ModelError::DownloadFailed(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ModelError::DownloadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ModelError::DownloadFailed(format!(
                "HTTP {}: {}",
                response.status(),
                url
            )));
        }

        let total = response.content_length().unwrap_or(0);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;

        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(ModelError::Cancelled);
            }

            let chunk = chunk.map_err(|e| ModelError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let fraction = if total > 0 {
                (downloaded.min(total) as f64 / total as f64) as f32
            } else {
                0.0
            };
            on_progress(fraction);
        }

        file.flush().await?;

        tracing::debug!(url, bytes = downloaded, "transfer finished");
        Ok(downloaded)
    }
}
