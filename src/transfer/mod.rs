//! Transfer engine: moves bytes between the local filesystem and an object store
//!
//! Each component is usable on its own; `TransferEngine` wires them over one
//! shared store handle and exposes the operations collaborators call.

pub mod delete;
pub mod download;
pub mod error;
pub mod factory;
pub mod list;
pub mod multipart;
pub mod result;
pub mod selector;
pub mod single;

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, TransferSettings};
use crate::s3::signer::MAX_PRESIGN_EXPIRY_SECS;
use crate::s3::ObjectStore;

pub use delete::Deleter;
pub use download::Downloader;
pub use error::{ErrorKind, Result, TransferError};
pub use factory::StoreClientFactory;
pub use list::{Lister, ObjectMetadata};
pub use multipart::{
    ConcurrentMultipartUploader, LargeObjectUploader, MultipartUploader, PartPlan, PartSpec,
    SessionState,
};
pub use result::{DownloadResult, TransferReport, TransferResult};
pub use selector::{Strategy, TransferStrategySelector};
pub use single::SingleShotUploader;

/// Default lifetime of a presigned download URL
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// Content to upload
#[derive(Debug, Clone)]
pub enum TransferSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl TransferSource {
    /// Read the whole source into memory
    pub async fn load(&self) -> Result<Bytes> {
        match self {
            TransferSource::Path(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| TransferError::from_io(e, path)),
            TransferSource::Bytes(data) => Ok(data.clone()),
        }
    }
}

impl std::fmt::Display for TransferSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferSource::Path(path) => write!(f, "{}", path.display()),
            TransferSource::Bytes(data) => write!(f, "<{} bytes in memory>", data.len()),
        }
    }
}

impl From<PathBuf> for TransferSource {
    fn from(path: PathBuf) -> Self {
        TransferSource::Path(path)
    }
}

impl From<&Path> for TransferSource {
    fn from(path: &Path) -> Self {
        TransferSource::Path(path.to_path_buf())
    }
}

impl From<Bytes> for TransferSource {
    fn from(data: Bytes) -> Self {
        TransferSource::Bytes(data)
    }
}

impl From<Vec<u8>> for TransferSource {
    fn from(data: Vec<u8>) -> Self {
        TransferSource::Bytes(Bytes::from(data))
    }
}

/// Key used when a path is uploaded without one: the file's base name
pub fn default_key(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            TransferError::Validation(format!("{} has no usable file name", path.display()))
        })
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TransferError::Validation("object key must not be empty".to_string()));
    }
    Ok(())
}

/// The capability surface over one bucket
#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<dyn ObjectStore>,
    settings: TransferSettings,
    single: SingleShotUploader,
    multipart: Arc<dyn LargeObjectUploader>,
    selector: TransferStrategySelector,
    downloader: Downloader,
    lister: Lister,
    deleter: Deleter,
}

impl TransferEngine {
    /// Wire every component over `store`. A `concurrency` above 1 selects the
    /// concurrent multipart uploader.
    pub fn new(store: Arc<dyn ObjectStore>, settings: TransferSettings) -> Self {
        let multipart: Arc<dyn LargeObjectUploader> = if settings.concurrency > 1 {
            Arc::new(ConcurrentMultipartUploader::new(
                store.clone(),
                settings.part_size,
                settings.concurrency,
            ))
        } else {
            Arc::new(MultipartUploader::new(store.clone(), settings.part_size))
        };
        Self::with_multipart(store, settings, multipart)
    }

    /// Wire the engine with a caller-chosen large object uploader
    pub fn with_multipart(
        store: Arc<dyn ObjectStore>,
        settings: TransferSettings,
        multipart: Arc<dyn LargeObjectUploader>,
    ) -> Self {
        let single = SingleShotUploader::new(store.clone());
        let selector = TransferStrategySelector::new(
            settings.multipart_threshold,
            single.clone(),
            multipart.clone(),
        );
        Self {
            downloader: Downloader::new(store.clone()),
            lister: Lister::new(store.clone(), settings.list_page_size),
            deleter: Deleter::new(store.clone()),
            store,
            settings,
            single,
            multipart,
            selector,
        }
    }

    /// Build an HTTP-backed engine, failing with `Config` on incomplete store settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let factory = StoreClientFactory::new(config.store.clone())?;
        Ok(Self::new(factory.build()?, config.transfer.clone()))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Single PUT of a file or in-memory content
    pub async fn upload(&self, source: impl Into<TransferSource>, key: &str) -> Result<TransferResult> {
        self.single.upload(&source.into(), key).await
    }

    /// Multipart upload of a file; `part_size` overrides the configured size
    pub async fn upload_large(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        part_size: Option<u64>,
    ) -> Result<TransferResult> {
        self.multipart.upload(path.as_ref(), key, part_size).await
    }

    /// Upload a file choosing the strategy by size
    pub async fn upload_auto(&self, path: impl AsRef<Path>, key: &str) -> Result<TransferResult> {
        self.selector.choose_and_upload(path.as_ref(), key).await
    }

    pub async fn download(&self, key: &str) -> Result<Bytes> {
        self.downloader.download(key).await
    }

    pub async fn download_to(&self, key: &str, dest: impl AsRef<Path>) -> Result<DownloadResult> {
        self.downloader.download_to(key, dest.as_ref()).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>> {
        self.lister.list(prefix).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.deleter.delete(key).await
    }

    /// Time-limited GET URL for `key`; `expires` defaults to one hour
    pub fn presign_download(&self, key: &str, expires: Option<Duration>) -> Result<String> {
        validate_key(key)?;
        let expires = expires.unwrap_or(DEFAULT_PRESIGN_EXPIRY);
        if expires.as_secs() == 0 || expires.as_secs() > MAX_PRESIGN_EXPIRY_SECS {
            return Err(TransferError::Validation(format!(
                "presigned URL expiry must be between 1 and {} seconds",
                MAX_PRESIGN_EXPIRY_SECS
            )));
        }
        self.store
            .presign_get(key, expires)
            .map_err(|e| TransferError::from_store(e, "presign"))
    }
}
