//! In-process implementation of the store port
//!
//! Behaves like an S3 bucket closely enough to exercise the transfer engine:
//! lexicographic key order, paginated listing with continuation tokens, MD5
//! etags, multipart sessions that must be completed with contiguous parts.
//! Faults can be injected per operation and every call is recorded.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use hyper::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;
use std::time::Duration;

use crate::s3::store::{ObjectStore, Result, S3Error};
use crate::s3::types::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    ListObjectsPage, PutObjectResponse, S3Object, UploadPartResponse,
};

/// A call received by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put { key: String, size: u64 },
    CreateMultipart { key: String, upload_id: String },
    UploadPart { upload_id: String, part_number: u32, size: u64 },
    Complete { upload_id: String, part_numbers: Vec<u32> },
    Abort { upload_id: String },
    Get { key: String },
    List { prefix: Option<String>, continuation_token: Option<String> },
    Delete { key: String },
}

/// Terminal state of a multipart session as seen by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Open,
    Completed,
    Aborted,
}

#[derive(Debug, Default)]
struct Faults {
    fail_create: bool,
    fail_part: Option<u32>,
    fail_complete: bool,
    fail_abort: bool,
    fail_put: bool,
    fail_get: bool,
    fail_list_after_pages: Option<usize>,
    part_delay: Option<Duration>,
}

struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (Bytes, String)>,
    status: UploadStatus,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
    list_pages_served: usize,
    calls: Vec<StoreCall>,
}

/// In-memory bucket
pub struct MemoryStore {
    bucket: String,
    max_page_size: u32,
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

fn injected(operation: &str) -> S3Error {
    S3Error::S3Response {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "InternalError".to_string(),
        message: format!("injected failure in {}", operation),
    }
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            max_page_size: 1000,
            state: Mutex::new(State::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Cap every list page at `n` keys regardless of what the caller asks for
    pub fn with_max_page_size(mut self, n: u32) -> Self {
        self.max_page_size = n.max(1);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store an object directly, bypassing call recording
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let data = data.into();
        let etag = md5_hex(&data);
        self.state().objects.insert(
            key.into(),
            StoredObject {
                data,
                etag,
                last_modified: Utc::now(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).map(|o| o.data.clone())
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    /// Number of Abort calls received for `upload_id`
    pub fn abort_calls(&self, upload_id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, StoreCall::Abort { upload_id: id } if id == upload_id))
            .count()
    }

    /// Upload IDs in creation order
    pub fn upload_ids(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::CreateMultipart { upload_id, .. } => Some(upload_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn upload_status(&self, upload_id: &str) -> Option<UploadStatus> {
        self.state().uploads.get(upload_id).map(|u| u.status)
    }

    /// Sessions neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.state()
            .uploads
            .values()
            .filter(|u| u.status == UploadStatus::Open)
            .count()
    }

    pub fn fail_create(&self) {
        self.faults().fail_create = true;
    }

    /// Fail the upload of part `n` of any session
    pub fn fail_part(&self, n: u32) {
        self.faults().fail_part = Some(n);
    }

    pub fn fail_complete(&self) {
        self.faults().fail_complete = true;
    }

    pub fn fail_abort(&self) {
        self.faults().fail_abort = true;
    }

    pub fn fail_put(&self) {
        self.faults().fail_put = true;
    }

    pub fn fail_get(&self) {
        self.faults().fail_get = true;
    }

    /// Serve `n` list pages, then fail
    pub fn fail_list_after(&self, n: usize) {
        self.faults().fail_list_after_pages = Some(n);
    }

    /// Delay every part upload, for cancellation tests
    pub fn delay_parts(&self, delay: Duration) {
        self.faults().part_delay = Some(delay);
    }

    fn record(&self, call: StoreCall) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<PutObjectResponse> {
        self.record(StoreCall::Put {
            key: key.to_string(),
            size: data.len() as u64,
        });
        if self.faults().fail_put {
            return Err(injected("PutObject"));
        }
        let etag = md5_hex(&data);
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                data,
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(PutObjectResponse { etag })
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<CreateMultipartUploadResponse> {
        if self.faults().fail_create {
            return Err(injected("CreateMultipartUpload"));
        }
        let mut state = self.state();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
                status: UploadStatus::Open,
            },
        );
        state.calls.push(StoreCall::CreateMultipart {
            key: key.to_string(),
            upload_id: upload_id.clone(),
        });
        Ok(CreateMultipartUploadResponse::new(
            self.bucket.clone(),
            key.to_string(),
            upload_id,
        ))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartResponse> {
        self.record(StoreCall::UploadPart {
            upload_id: upload_id.to_string(),
            part_number,
            size: data.len() as u64,
        });

        let (delay, fail) = {
            let faults = self.faults();
            (faults.part_delay, faults.fail_part == Some(part_number))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(injected("UploadPart"));
        }

        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.status == UploadStatus::Open && u.key == key)
            .ok_or_else(|| S3Error::S3Response {
                status: StatusCode::NOT_FOUND,
                code: "NoSuchUpload".to_string(),
                message: format!("no open upload {}", upload_id),
            })?;
        let etag = md5_hex(&data);
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(UploadPartResponse::new(part_number, etag))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadResponse> {
        self.record(StoreCall::Complete {
            upload_id: upload_id.to_string(),
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });
        if self.faults().fail_complete {
            return Err(injected("CompleteMultipartUpload"));
        }

        let invalid = |message: String| S3Error::S3Response {
            status: StatusCode::BAD_REQUEST,
            code: "InvalidPart".to_string(),
            message,
        };

        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.status == UploadStatus::Open && u.key == key)
            .ok_or_else(|| S3Error::S3Response {
                status: StatusCode::NOT_FOUND,
                code: "NoSuchUpload".to_string(),
                message: format!("no open upload {}", upload_id),
            })?;

        if parts.is_empty() {
            return Err(invalid("no parts".to_string()));
        }
        let mut body = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        for (i, part) in parts.iter().enumerate() {
            if part.part_number as usize != i + 1 {
                return Err(invalid(format!(
                    "part {} out of order at position {}",
                    part.part_number,
                    i + 1
                )));
            }
            let (data, etag) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| invalid(format!("part {} was never uploaded", part.part_number)))?;
            if etag != part.etag.trim_matches('"') {
                return Err(invalid(format!("etag mismatch for part {}", part.part_number)));
            }
            body.extend_from_slice(data);
            if let Ok(raw) = hex::decode(etag) {
                digests.extend_from_slice(&raw);
            }
        }

        upload.status = UploadStatus::Completed;
        let etag = format!("{}-{}", md5_hex(&digests), parts.len());
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data: body.freeze(),
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );

        Ok(CompleteMultipartUploadResponse::new(
            self.bucket.clone(),
            key.to_string(),
            etag,
        ))
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.record(StoreCall::Abort {
            upload_id: upload_id.to_string(),
        });
        if self.faults().fail_abort {
            return Err(injected("AbortMultipartUpload"));
        }
        let mut state = self.state();
        match state.uploads.get_mut(upload_id) {
            Some(upload) if upload.status != UploadStatus::Completed => {
                upload.status = UploadStatus::Aborted;
                upload.parts.clear();
                Ok(())
            }
            _ => Err(S3Error::S3Response {
                status: StatusCode::NOT_FOUND,
                code: "NoSuchUpload".to_string(),
                message: format!("no open upload {}", upload_id),
            }),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.record(StoreCall::Get {
            key: key.to_string(),
        });
        if self.faults().fail_get {
            return Err(injected("GetObject"));
        }
        self.object(key).ok_or_else(|| S3Error::NotFound {
            key: key.to_string(),
        })
    }

    async fn list_objects_page(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: u32,
    ) -> Result<ListObjectsPage> {
        self.record(StoreCall::List {
            prefix: prefix.map(str::to_string),
            continuation_token: continuation_token.map(str::to_string),
        });

        let mut state = self.state();
        if let Some(limit) = self.faults().fail_list_after_pages {
            if state.list_pages_served >= limit {
                return Err(injected("ListObjectsV2"));
            }
        }
        state.list_pages_served += 1;

        let prefix = prefix.unwrap_or("");
        let page_size = max_keys.clamp(1, self.max_page_size) as usize;
        let start = match continuation_token {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut page = ListObjectsPage::new();
        let mut matching = state
            .objects
            .range::<String, _>((start, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .peekable();

        while page.contents.len() < page_size {
            match matching.next() {
                Some((key, obj)) => page.contents.push(S3Object {
                    key: key.clone(),
                    size: obj.data.len() as u64,
                    last_modified: Some(obj.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    etag: Some(obj.etag.clone()),
                }),
                None => break,
            }
        }

        if matching.peek().is_some() {
            page.is_truncated = true;
            page.next_continuation_token = page.contents.last().map(|o| o.key.clone());
        }
        page.key_count = Some(page.contents.len() as u32);
        Ok(page)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.record(StoreCall::Delete {
            key: key.to_string(),
        });
        self.state().objects.remove(key);
        Ok(())
    }

    fn presign_get(&self, key: &str, expires: Duration) -> Result<String> {
        Ok(format!(
            "memory://{}/{}?X-Amz-Expires={}",
            self.bucket,
            key,
            expires.as_secs()
        ))
    }
}
