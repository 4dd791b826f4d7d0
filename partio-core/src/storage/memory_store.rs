use crate::error::{PartioError, Result};
use crate::storage::ContentStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use ulid::Ulid;

/// In-process backends: address -> part id -> blob
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    backends: RwLock<BTreeMap<String, HashMap<Ulid, Bytes>>>,
}

impl InMemoryContentStore {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backends = addresses
            .into_iter()
            .map(|address| (address.into(), HashMap::new()))
            .collect();

        Self {
            backends: RwLock::new(backends),
        }
    }

    /// Register a backend; existing blobs on it are kept
    pub async fn add_backend(&self, address: impl Into<String>) {
        self.backends
            .write()
            .await
            .entry(address.into())
            .or_default();
    }

    /// Drop a backend together with every blob it holds
    pub async fn remove_backend(&self, address: &str) -> bool {
        self.backends.write().await.remove(address).is_some()
    }

    pub async fn contains(&self, part_id: Ulid, backend: &str) -> bool {
        self.backends
            .read()
            .await
            .get(backend)
            .is_some_and(|parts| parts.contains_key(&part_id))
    }

    pub async fn blob_count(&self) -> usize {
        self.backends.read().await.values().map(HashMap::len).sum()
    }
}

fn backend_not_found(backend: &str) -> PartioError {
    PartioError::NotFound(format!("backend {}", backend))
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn list_available_backends(&self) -> Result<Vec<String>> {
        Ok(self.backends.read().await.keys().cloned().collect())
    }

    async fn put(&self, part_id: Ulid, backend: &str, data: Bytes) -> Result<()> {
        let mut backends = self.backends.write().await;
        let parts = backends
            .get_mut(backend)
            .ok_or_else(|| backend_not_found(backend))?;

        if parts.contains_key(&part_id) {
            return Err(PartioError::Conflict(format!(
                "part {} already stored on {}",
                part_id, backend
            )));
        }

        parts.insert(part_id, data);
        Ok(())
    }

    async fn get(&self, part_id: Ulid, backend: &str) -> Result<Bytes> {
        let backends = self.backends.read().await;
        let parts = backends
            .get(backend)
            .ok_or_else(|| backend_not_found(backend))?;

        parts.get(&part_id).cloned().ok_or_else(|| {
            PartioError::NotFound(format!("part {} on {}", part_id, backend))
        })
    }

    async fn delete(&self, part_id: Ulid, backend: &str) -> Result<()> {
        let mut backends = self.backends.write().await;
        let parts = backends
            .get_mut(backend)
            .ok_or_else(|| backend_not_found(backend))?;

        parts.remove(&part_id);
        Ok(())
    }
}
