//! Object store port and its implementations
//!
//! This module provides:
//! - The `ObjectStore` trait the transfer engine talks to
//! - An HTTP implementation with AWS SigV4 signing (`S3Client`)
//! - An in-process implementation with fault injection (`MemoryStore`)
//! - Type-safe S3 response structures and XML codecs

pub mod client;
pub mod memory;
pub mod signer;
pub mod store;
pub mod types;
pub mod xml;

pub use client::S3Client;
pub use memory::{MemoryStore, StoreCall, UploadStatus};
pub use signer::S3SignerV4;
pub use store::{ObjectStore, Result, S3Error};
pub use types::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    ListObjectsPage, PutObjectResponse, S3Object, UploadPartResponse,
};
