use std::sync::Arc;
use tracing::debug;

use super::error::{Result, TransferError};
use crate::config::StoreConfig;
use crate::s3::{ObjectStore, S3Client};

/// Builds store handles bound to one endpoint, credential pair and bucket.
///
/// The configuration is checked once, in `new`; every handle built afterwards
/// is independent and safe to share across concurrent transfers.
#[derive(Debug, Clone)]
pub struct StoreClientFactory {
    config: StoreConfig,
}

impl StoreClientFactory {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(TransferError::Config(format!(
                "missing store configuration: {}",
                missing.join(", ")
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// HTTP client for the configured bucket
    pub fn client(&self) -> Result<S3Client> {
        debug!(
            "Building store client for {} bucket {}",
            self.config.endpoint, self.config.bucket
        );
        S3Client::new(&self.config).map_err(|e| TransferError::Config(e.to_string()))
    }

    pub fn build(&self) -> Result<Arc<dyn ObjectStore>> {
        Ok(Arc::new(self.client()?))
    }
}
