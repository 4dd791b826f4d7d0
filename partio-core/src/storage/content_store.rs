use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use ulid::Ulid;

/// Blob storage spread over addressable backends.
///
/// `put` and `get` are strict: an unknown backend or an already-written
/// (part, backend) pair is an error. `delete` only fails for an unknown
/// backend; removing an absent blob succeeds so cleanup can be repeated.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Backends currently reachable; may change between calls
    async fn list_available_backends(&self) -> Result<Vec<String>>;

    async fn put(&self, part_id: Ulid, backend: &str, data: Bytes) -> Result<()>;

    async fn get(&self, part_id: Ulid, backend: &str) -> Result<Bytes>;

    async fn delete(&self, part_id: Ulid, backend: &str) -> Result<()>;
}
