use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::error::{Result, TransferError};
use crate::s3::{ObjectStore, S3Object};

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl From<S3Object> for ObjectMetadata {
    fn from(obj: S3Object) -> Self {
        let last_modified = obj
            .last_modified
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));
        Self {
            key: obj.key,
            size: obj.size,
            last_modified,
        }
    }
}

/// Enumerates every object under a prefix, following continuation tokens
/// until the store reports the listing is complete
#[derive(Clone)]
pub struct Lister {
    store: Arc<dyn ObjectStore>,
    page_size: u32,
}

impl Lister {
    pub fn new(store: Arc<dyn ObjectStore>, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.clamp(1, 1000),
        }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>> {
        let prefix = Some(prefix).filter(|p| !p.is_empty());
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .store
                .list_objects_page(prefix, token.as_deref(), self.page_size)
                .await
                .map_err(|e| TransferError::from_store(e, "ListObjectsV2"))?;
            pages += 1;
            objects.extend(page.contents.into_iter().map(ObjectMetadata::from));

            if !page.is_truncated {
                break;
            }
            match page.next_continuation_token {
                Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                Some(_) => {
                    return Err(TransferError::Transfer(
                        "store repeated the same continuation token".to_string(),
                    ))
                }
                None => {
                    return Err(TransferError::Transfer(
                        "store reported a truncated listing without a continuation token"
                            .to_string(),
                    ))
                }
            }
        }

        debug!(
            "Listed {} objects under {:?} in {} page(s)",
            objects.len(),
            prefix.unwrap_or(""),
            pages
        );
        Ok(objects)
    }
}
