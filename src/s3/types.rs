//! Response and request shapes shared by every `ObjectStore` implementation.
//! ETags are always held without their surrounding quotes.

use serde::{Deserialize, Serialize};

/// A `<Contents>` entry of a ListObjectsV2 page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    pub key: String,
    pub size: u64,
    /// ISO 8601, exactly as the store sent it
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl S3Object {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            etag: None,
        }
    }
}

/// One ListObjectsV2 page. `next_continuation_token` is set when `is_truncated` is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObjectsPage {
    pub contents: Vec<S3Object>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub key_count: Option<u32>,
}

impl ListObjectsPage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutObjectResponse {
    pub etag: String,
}

/// `<InitiateMultipartUploadResult>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMultipartUploadResponse {
    pub bucket: String,
    pub key: String,
    /// Opaque session token for UploadPart, Complete and Abort
    pub upload_id: String,
}

impl CreateMultipartUploadResponse {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPartResponse {
    pub part_number: u32,
    pub etag: String,
}

impl UploadPartResponse {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// `<Part>` element of a CompleteMultipartUpload request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based, at most 10000
    pub part_number: u32,
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// `<CompleteMultipartUploadResult>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMultipartUploadResponse {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    /// Multipart etags have the form `<md5 of part md5s>-<part count>`
    pub etag: String,
}

impl CompleteMultipartUploadResponse {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            location: None,
            bucket: bucket.into(),
            key: key.into(),
            etag: etag.into(),
        }
    }
}
