//! s3xfer - transfer engine for S3-compatible object stores

pub mod cli;
pub mod config;
pub mod s3;
pub mod transfer;

pub use config::{Config, StoreConfig, TransferSettings};
pub use s3::{MemoryStore, ObjectStore, S3Client};
pub use transfer::{ErrorKind, TransferEngine, TransferError, TransferReport, TransferResult};
