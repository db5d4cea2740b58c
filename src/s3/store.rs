//! The store port: the capabilities the transfer engine needs from an
//! S3-compatible object store.

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::s3::types::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    ListObjectsPage, PutObjectResponse, UploadPartResponse,
};

/// Store-level errors
#[derive(Error, Debug)]
pub enum S3Error {
    #[error("no such key: {key}")]
    NotFound { key: String },

    #[error("S3 error: {status} {code} - {message}")]
    S3Response {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Request(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(err.to_string())
    }
}

impl From<hyper::http::Error> for S3Error {
    fn from(err: hyper::http::Error) -> Self {
        S3Error::Request(format!("request build error: {}", err))
    }
}

impl From<hyper_util::client::legacy::Error> for S3Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        S3Error::Request(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;

/// REST capabilities of an S3-compatible store, bound to one bucket.
///
/// Implementations are shared behind `Arc` across concurrent transfers and
/// must not keep per-call state.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every call operates on
    fn bucket(&self) -> &str;

    /// Whole-object PUT
    async fn put_object(&self, key: &str, data: Bytes) -> Result<PutObjectResponse>;

    /// Begin a multipart session and obtain its upload ID
    async fn create_multipart_upload(&self, key: &str) -> Result<CreateMultipartUploadResponse>;

    /// Upload one part (1-based part number) of an open session
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartResponse>;

    /// Commit a session; `parts` must be sorted by part number
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadResponse>;

    /// Discard a session and every part uploaded to it
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Fetch a whole object. Absent keys yield `S3Error::NotFound`.
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    /// Fetch one ListObjectsV2 page
    async fn list_objects_page(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: u32,
    ) -> Result<ListObjectsPage>;

    /// Remove an object. Absent keys are not an error.
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Build a time-limited GET URL for `key`
    fn presign_get(&self, key: &str, expires: Duration) -> Result<String>;
}
