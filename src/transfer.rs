//! Move a finished provider asset into durable storage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;

use crate::dispatch::{AssetKind, read_capped};
use crate::error::SketchbookError;
use crate::storage::{Placement, Storage, StoredAsset};

/// Largest asset accepted from a provider (256MB).
pub const MAX_DOWNLOAD_BYTES: usize = 256 * 1024 * 1024;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ArtifactTransfer {
    client: Client,
    storage: Arc<Storage>,
}

impl ArtifactTransfer {
    pub fn new(storage: Arc<Storage>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build download HTTP client");
        Self { client, storage }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Download `asset_url` and re-upload it under `placement`. A failed
    /// download or upload fails the whole transfer; nothing is retried.
    pub async fn transfer(
        &self,
        asset_url: &str,
        kind: AssetKind,
        placement: &Placement,
    ) -> Result<StoredAsset, SketchbookError> {
        let start = Instant::now();
        let bytes = self.download(asset_url).await?;
        let (ext, content_type) = kind.file_type_for(asset_url);

        tracing::info!(
            url = asset_url,
            size = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "downloaded generated asset"
        );

        self.storage.store(bytes, placement, ext, content_type).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, SketchbookError> {
        let download_error = |message: String| SketchbookError::Download {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("HTTP {status}")));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_DOWNLOAD_BYTES as u64)
        {
            return Err(download_error("asset too large".to_string()));
        }

        let (bytes, truncated) = read_capped(response, MAX_DOWNLOAD_BYTES)
            .await
            .map_err(|e| download_error(e.to_string()))?;
        if truncated {
            return Err(download_error("asset too large".to_string()));
        }
        if bytes.is_empty() {
            return Err(download_error("empty body".to_string()));
        }
        Ok(bytes)
    }
}
