//! Error taxonomy returned by every transfer operation

use serde::Serialize;
use std::path::Path;
use thiserror::Error;

use crate::s3::S3Error;

/// Classified failure of a transfer operation
#[derive(Error, Debug)]
pub enum TransferError {
    /// Missing credentials or bucket; raised when the client is built
    #[error("configuration error: {0}")]
    Config(String),

    /// Object key or source file does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Request rejected before reaching the store
    #[error("invalid request: {0}")]
    Validation(String),

    /// Network or store failure
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Multipart upload failed after at least one part was stored.
    /// The session has been aborted by the time this is returned.
    #[error("multipart upload of {key} failed after {uploaded_parts} part(s): {source}")]
    PartialUpload {
        key: String,
        upload_id: String,
        uploaded_parts: u32,
        source: Box<TransferError>,
    },
}

/// Kind of a `TransferError`, as exposed to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "ConfigError")]
    Config,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "TransferError")]
    Transfer,
    #[serde(rename = "PartialUploadError")]
    PartialUpload,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Transfer => "TransferError",
            ErrorKind::PartialUpload => "PartialUploadError",
        }
    }

    /// HTTP layers map this to 404, everything else to 5xx
    pub fn is_not_found(&self) -> bool {
        matches!(self, ErrorKind::NotFound)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Config(_) => ErrorKind::Config,
            TransferError::NotFound(_) => ErrorKind::NotFound,
            TransferError::Validation(_) => ErrorKind::Validation,
            TransferError::Transfer(_) => ErrorKind::Transfer,
            TransferError::PartialUpload { .. } => ErrorKind::PartialUpload,
        }
    }

    /// Classify a store error. Only an explicit missing-key answer becomes `NotFound`.
    pub fn from_store(err: S3Error, operation: &str) -> Self {
        match err {
            S3Error::NotFound { key } => TransferError::NotFound(key),
            other => TransferError::Transfer(format!("{} failed: {}", operation, other)),
        }
    }

    /// Classify a local filesystem error on `path`
    pub fn from_io(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                TransferError::NotFound(format!("source file {} does not exist", path.display()))
            }
            _ => TransferError::Transfer(format!("{}: {}", path.display(), err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
