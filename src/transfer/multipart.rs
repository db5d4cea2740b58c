//! Multipart upload: create, upload parts, complete, abort on failure
//!
//! An `UploadSession` owns the store-side session for exactly one call. It ends
//! in `Completed` or `Aborted` on every exit path: failures abort it explicitly
//! before the error is returned, and a session dropped while still open (the
//! caller's future was cancelled) spawns its own abort on the current runtime.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{Result, TransferError};
use super::result::TransferResult;
use super::selector::Strategy;
use super::validate_key;
use crate::s3::{CompletedPart, ObjectStore};

/// Largest part number a store accepts
pub const MAX_PARTS: u64 = 10_000;

/// Byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// 1-based part number
    pub number: u32,
    pub offset: u64,
    pub len: u64,
}

/// How an object of `size` bytes splits into parts of `part_size`.
///
/// Every part but the last is exactly `part_size` long; the last holds the
/// remainder. An empty object is one empty part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    size: u64,
    part_size: u64,
}

impl PartPlan {
    pub fn new(size: u64, part_size: u64) -> Result<Self> {
        if part_size == 0 {
            return Err(TransferError::Validation(
                "part size must be at least 1 byte".to_string(),
            ));
        }
        let plan = Self { size, part_size };
        if plan.part_count() as u64 > MAX_PARTS {
            return Err(TransferError::Validation(format!(
                "{} bytes in parts of {} bytes needs more than {} parts",
                size, part_size, MAX_PARTS
            )));
        }
        Ok(plan)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        let count = self.size.div_ceil(self.part_size).max(1);
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn parts(&self) -> impl Iterator<Item = PartSpec> + Send + 'static {
        let PartPlan { size, part_size } = *self;
        (0..self.part_count()).map(move |i| {
            let offset = i as u64 * part_size;
            PartSpec {
                number: i + 1,
                offset,
                len: part_size.min(size - offset),
            }
        })
    }
}

/// Lifecycle of a store-side multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    InProgress,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

struct UploadSession {
    store: Arc<dyn ObjectStore>,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    state: SessionState,
}

impl UploadSession {
    async fn begin(store: Arc<dyn ObjectStore>, key: &str) -> Result<Self> {
        let created = store
            .create_multipart_upload(key)
            .await
            .map_err(|e| TransferError::from_store(e, "CreateMultipartUpload"))?;
        debug!("Created multipart upload {} for {}", created.upload_id, key);

        Ok(Self {
            store,
            key: key.to_string(),
            upload_id: created.upload_id,
            parts: Vec::new(),
            state: SessionState::Created,
        })
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn record(&mut self, part: CompletedPart) {
        self.state = SessionState::InProgress;
        self.parts.push(part);
    }

    async fn upload_part(&mut self, part_number: u32, data: Bytes) -> Result<()> {
        let len = data.len();
        let response = self
            .store
            .upload_part(&self.key, &self.upload_id, part_number, data)
            .await
            .map_err(|e| TransferError::from_store(e, &format!("UploadPart {}", part_number)))?;
        debug!("Uploaded part {} of {} ({} bytes)", part_number, self.key, len);
        self.record(CompletedPart::new(part_number, response.etag));
        Ok(())
    }

    /// Commit the session with parts ordered by number
    async fn complete(&mut self) -> Result<String> {
        self.parts.sort_by_key(|p| p.part_number);
        let response = self
            .store
            .complete_multipart_upload(&self.key, &self.upload_id, &self.parts)
            .await
            .map_err(|e| TransferError::from_store(e, "CompleteMultipartUpload"))?;
        self.state = SessionState::Completed;
        Ok(response.etag)
    }

    /// Abort on a detached task. Once spawned the request runs to completion
    /// even if this future is dropped while awaiting it.
    async fn abort(&mut self) {
        self.state = SessionState::Aborted;
        warn!("Aborting multipart upload {} for {}", self.upload_id, self.key);
        let task = spawn_abort(self.store.clone(), self.key.clone(), self.upload_id.clone());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Abort task for upload {} did not finish: {}", self.upload_id, e);
            }
        }
    }

    /// Abort, then return `err` classified by how far the upload got
    async fn fail(&mut self, err: TransferError) -> TransferError {
        self.abort().await;
        let uploaded_parts = self.parts.len() as u32;
        if uploaded_parts == 0 {
            return err;
        }
        TransferError::PartialUpload {
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            uploaded_parts,
            source: Box::new(err),
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!(
            "Multipart upload {} for {} interrupted, aborting",
            self.upload_id, self.key
        );
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        let _ = spawn_abort(self.store.clone(), key, upload_id);
    }
}

/// Send AbortMultipartUpload on the current runtime, detached from the caller
fn spawn_abort(
    store: Arc<dyn ObjectStore>,
    key: String,
    upload_id: String,
) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            if let Err(e) = store.abort_multipart_upload(&key, &upload_id).await {
                error!("Failed to abort multipart upload {} for {}: {}", upload_id, key, e);
            }
        })),
        Err(_) => {
            error!(
                "Multipart upload {} for {} left open: no runtime to abort it on",
                upload_id, key
            );
            None
        }
    }
}

/// A way of uploading a large file as a multipart object
#[async_trait]
pub trait LargeObjectUploader: Send + Sync {
    /// Upload `path` to `key`; `part_size` overrides the uploader's default
    async fn upload(&self, path: &Path, key: &str, part_size: Option<u64>) -> Result<TransferResult>;
}

async fn open_source(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path)
        .await
        .map_err(|e| TransferError::from_io(e, path))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| TransferError::from_io(e, path))?;
    if !metadata.is_file() {
        return Err(TransferError::Validation(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok((file, metadata.len()))
}

async fn read_part(file: &mut File, path: &Path, part: PartSpec) -> Result<Bytes> {
    let mut buf = vec![0u8; part.len as usize];
    file.read_exact(&mut buf).await.map_err(|e| {
        TransferError::Transfer(format!(
            "reading part {} of {}: {}",
            part.number,
            path.display(),
            e
        ))
    })?;
    Ok(Bytes::from(buf))
}

fn finished(key: &str, etag: String, plan: &PartPlan) -> TransferResult {
    TransferResult {
        key: key.to_string(),
        etag,
        size: plan.size(),
        parts: Some(plan.part_count()),
        strategy: Strategy::Multipart,
    }
}

/// Uploads parts one at a time: a part is read only after the previous one
/// was accepted, so at most one part buffer is held.
#[derive(Clone)]
pub struct MultipartUploader {
    store: Arc<dyn ObjectStore>,
    part_size: u64,
}

impl MultipartUploader {
    pub fn new(store: Arc<dyn ObjectStore>, part_size: u64) -> Self {
        Self { store, part_size }
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    async fn send_parts(
        &self,
        session: &mut UploadSession,
        file: &mut File,
        path: &Path,
        plan: &PartPlan,
    ) -> Result<String> {
        for part in plan.parts() {
            let data = read_part(file, path, part).await?;
            session.upload_part(part.number, data).await?;
        }
        session.complete().await
    }
}

#[async_trait]
impl LargeObjectUploader for MultipartUploader {
    async fn upload(&self, path: &Path, key: &str, part_size: Option<u64>) -> Result<TransferResult> {
        validate_key(key)?;
        let (mut file, size) = open_source(path).await?;
        let plan = PartPlan::new(size, part_size.unwrap_or(self.part_size))?;

        info!(
            "Uploading {} ({} bytes) to {} in {} part(s) of {} bytes",
            path.display(),
            size,
            key,
            plan.part_count(),
            plan.part_size()
        );

        let mut session = UploadSession::begin(self.store.clone(), key).await?;
        match self.send_parts(&mut session, &mut file, path, &plan).await {
            Ok(etag) => {
                info!("Completed multipart upload of {} ({} parts)", key, plan.part_count());
                Ok(finished(key, etag, &plan))
            }
            Err(e) => Err(session.fail(e).await),
        }
    }
}

/// Uploads up to `concurrency` parts at once.
///
/// Each part opens its own handle on the source and reads only its own byte
/// range; completion order does not matter because parts are sorted by number
/// before the session is committed.
#[derive(Clone)]
pub struct ConcurrentMultipartUploader {
    store: Arc<dyn ObjectStore>,
    part_size: u64,
    concurrency: usize,
}

impl ConcurrentMultipartUploader {
    pub fn new(store: Arc<dyn ObjectStore>, part_size: u64, concurrency: usize) -> Self {
        Self {
            store,
            part_size,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn send_parts(
        &self,
        session: &mut UploadSession,
        path: &Path,
        plan: &PartPlan,
    ) -> Result<String> {
        let path: PathBuf = path.to_path_buf();
        let key = session.key.clone();
        let upload_id = session.upload_id().to_string();
        let store = self.store.clone();

        let mut uploads = stream::iter(plan.parts())
            .map(|part| {
                let store = store.clone();
                let path = path.clone();
                let key = key.clone();
                let upload_id = upload_id.clone();
                async move {
                    let mut file = File::open(&path)
                        .await
                        .map_err(|e| TransferError::from_io(e, &path))?;
                    file.seek(SeekFrom::Start(part.offset)).await.map_err(|e| {
                        TransferError::Transfer(format!("seeking {}: {}", path.display(), e))
                    })?;
                    let data = read_part(&mut file, &path, part).await?;
                    drop(file);

                    let response = store
                        .upload_part(&key, &upload_id, part.number, data)
                        .await
                        .map_err(|e| {
                            TransferError::from_store(e, &format!("UploadPart {}", part.number))
                        })?;
                    debug!("Uploaded part {} of {} ({} bytes)", part.number, key, part.len);
                    Ok::<_, TransferError>(CompletedPart::new(part.number, response.etag))
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some(outcome) = uploads.next().await {
            // First failure drops the stream, cancelling parts still in flight
            session.record(outcome?);
        }
        drop(uploads);

        session.complete().await
    }
}

#[async_trait]
impl LargeObjectUploader for ConcurrentMultipartUploader {
    async fn upload(&self, path: &Path, key: &str, part_size: Option<u64>) -> Result<TransferResult> {
        validate_key(key)?;
        let (file, size) = open_source(path).await?;
        drop(file);
        let plan = PartPlan::new(size, part_size.unwrap_or(self.part_size))?;

        info!(
            "Uploading {} ({} bytes) to {} in {} part(s) of {} bytes, {} at a time",
            path.display(),
            size,
            key,
            plan.part_count(),
            plan.part_size(),
            self.concurrency
        );

        let mut session = UploadSession::begin(self.store.clone(), key).await?;
        match self.send_parts(&mut session, path, &plan).await {
            Ok(etag) => {
                info!("Completed multipart upload of {} ({} parts)", key, plan.part_count());
                Ok(finished(key, etag, &plan))
            }
            Err(e) => Err(session.fail(e).await),
        }
    }
}
