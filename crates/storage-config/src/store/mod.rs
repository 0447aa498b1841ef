use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;

mod fs;

pub use fs::FsConfigStore;

/// Storage entry name used when the host does not supply one.
pub const DEFAULT_CONFIG_ENTRY: &str = "config/transform";

/// Single-slot blob store supplied by the host's secret-storage backend.
///
/// `put` replaces the stored blob wholesale; a failed `put` must leave the
/// previous blob readable.
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    /// Fetch the persisted blob, `None` when nothing was ever written.
    async fn get(&self) -> Result<Option<Vec<u8>>, StoreError>;
    /// Durably replace the persisted blob.
    async fn put(&self, blob: &[u8]) -> Result<(), StoreError>;
}

/// Shared pointer helper for engine components.
pub type SharedStorage = Arc<dyn ConfigStorage>;

/// Process-local store, used by tests and embedded hosts without durable storage.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    inner: Mutex<Option<Vec<u8>>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing blob, as if a previous process wrote it.
    pub fn with_blob(blob: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Mutex::new(Some(blob.into())),
        }
    }
}

#[async_trait]
impl ConfigStorage for InMemoryConfigStore {
    async fn get(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.lock().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn put(&self, blob: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().map_err(|e| StoreError::Io(e.to_string()))?;
        *guard = Some(blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_starts_empty_and_replaces_wholesale() {
        let store = InMemoryConfigStore::new();
        assert!(store.get().await.unwrap().is_none());

        store.put(b"first").await.unwrap();
        store.put(b"second").await.unwrap();
        assert_eq!(store.get().await.unwrap().unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn seeded_store_returns_existing_blob() {
        let store = InMemoryConfigStore::with_blob(b"persisted".to_vec());
        assert_eq!(store.get().await.unwrap().unwrap(), b"persisted".to_vec());
    }
}
