//! Single-shot vs multipart decision

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::error::{Result, TransferError};
use super::multipart::LargeObjectUploader;
use super::result::TransferResult;
use super::single::SingleShotUploader;
use super::TransferSource;

/// How an upload was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    SingleShot,
    Multipart,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::SingleShot => f.write_str("single-shot"),
            Strategy::Multipart => f.write_str("multipart"),
        }
    }
}

/// Strategy for an object of `size` bytes. A size equal to the threshold stays single-shot.
pub fn choose(size: u64, threshold: u64) -> Strategy {
    if size > threshold {
        Strategy::Multipart
    } else {
        Strategy::SingleShot
    }
}

/// Routes path uploads to the single-shot or multipart uploader by size
#[derive(Clone)]
pub struct TransferStrategySelector {
    threshold: u64,
    single: SingleShotUploader,
    multipart: Arc<dyn LargeObjectUploader>,
}

impl TransferStrategySelector {
    pub fn new(
        threshold: u64,
        single: SingleShotUploader,
        multipart: Arc<dyn LargeObjectUploader>,
    ) -> Self {
        Self {
            threshold,
            single,
            multipart,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn choose(&self, size: u64) -> Strategy {
        choose(size, self.threshold)
    }

    pub async fn choose_and_upload(&self, path: &Path, key: &str) -> Result<TransferResult> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TransferError::from_io(e, path))?;
        if !metadata.is_file() {
            return Err(TransferError::Validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let strategy = self.choose(metadata.len());
        debug!(
            "{} is {} bytes (threshold {}), using {}",
            path.display(),
            metadata.len(),
            self.threshold,
            strategy
        );

        match strategy {
            Strategy::SingleShot => {
                self.single
                    .upload(&TransferSource::Path(path.to_path_buf()), key)
                    .await
            }
            Strategy::Multipart => self.multipart.upload(path, key, None).await,
        }
    }
}
