//! Outcome records handed back to callers

use serde::Serialize;
use std::path::PathBuf;

use super::error::{ErrorKind, TransferError};
use super::selector::Strategy;

/// Successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub key: String,
    /// ETag of the stored object, without quotes
    pub etag: String,
    pub size: u64,
    /// Number of parts, multipart uploads only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<u32>,
    pub strategy: Strategy,
}

/// Successful download to a local path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Flat success/failure record for collaborators that report results as data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub success: bool,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TransferReport {
    pub fn success(result: &TransferResult) -> Self {
        Self {
            success: true,
            key: result.key.clone(),
            etag: Some(result.etag.clone()),
            size: Some(result.size),
            parts: result.parts,
            strategy: Some(result.strategy),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(key: &str, err: &TransferError) -> Self {
        Self {
            success: false,
            key: key.to_string(),
            etag: None,
            size: None,
            parts: None,
            strategy: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }

    pub fn from_result(key: &str, result: &Result<TransferResult, TransferError>) -> Self {
        match result {
            Ok(r) => Self::success(r),
            Err(e) => Self::failure(key, e),
        }
    }
}
