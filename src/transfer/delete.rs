use std::sync::Arc;
use tracing::info;

use super::error::{Result, TransferError};
use super::validate_key;
use crate::s3::ObjectStore;

/// Removes objects. Deleting an absent key succeeds.
#[derive(Clone)]
pub struct Deleter {
    store: Arc<dyn ObjectStore>,
}

impl Deleter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.store
            .delete_object(key)
            .await
            .map_err(|e| TransferError::from_store(e, "DeleteObject"))?;
        info!("Deleted {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::MemoryStore;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = Arc::new(MemoryStore::new("b"));
        store.insert("k", Bytes::from_static(b"v"));
        let deleter = Deleter::new(store.clone());

        deleter.delete("k").await.unwrap();
        deleter.delete("k").await.unwrap();
        assert!(store.object("k").is_none());
    }
}
