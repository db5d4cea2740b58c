use std::sync::Arc;
use tracing::info;

use super::error::{Result, TransferError};
use super::result::TransferResult;
use super::selector::Strategy;
use super::{validate_key, TransferSource};
use crate::s3::ObjectStore;

/// Whole-object upload with a single PUT.
///
/// The full source is loaded into memory first; the store either replaces the
/// object with the new content or leaves it untouched.
#[derive(Clone)]
pub struct SingleShotUploader {
    store: Arc<dyn ObjectStore>,
}

impl SingleShotUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn upload(&self, source: &TransferSource, key: &str) -> Result<TransferResult> {
        validate_key(key)?;
        let data = source.load().await?;
        let size = data.len() as u64;

        info!("Uploading {} ({} bytes) to {}", source, size, key);
        let response = self
            .store
            .put_object(key, data)
            .await
            .map_err(|e| TransferError::from_store(e, "PutObject"))?;
        info!("Uploaded {} ({} bytes)", key, size);

        Ok(TransferResult {
            key: key.to_string(),
            etag: response.etag,
            size,
            parts: None,
            strategy: Strategy::SingleShot,
        })
    }
}
