use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::error::{Result, TransferError};
use super::result::DownloadResult;
use super::validate_key;
use crate::s3::ObjectStore;

/// Fetches whole objects into memory, optionally writing them to disk
#[derive(Clone)]
pub struct Downloader {
    store: Arc<dyn ObjectStore>,
}

impl Downloader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn download(&self, key: &str) -> Result<Bytes> {
        validate_key(key)?;
        let data = self
            .store
            .get_object(key)
            .await
            .map_err(|e| TransferError::from_store(e, "GetObject"))?;
        info!("Downloaded {} ({} bytes)", key, data.len());
        Ok(data)
    }

    /// Download `key` and write it to `dest`, creating missing parent directories
    pub async fn download_to(&self, key: &str, dest: &Path) -> Result<DownloadResult> {
        let data = self.download(key).await?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::from_io(e, parent))?;
        }
        tokio::fs::write(dest, &data)
            .await
            .map_err(|e| TransferError::from_io(e, dest))?;
        info!("Saved {} to {}", key, dest.display());

        Ok(DownloadResult {
            key: key.to_string(),
            size: data.len() as u64,
            path: Some(dest.to_path_buf()),
        })
    }
}
