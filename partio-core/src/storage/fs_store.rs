use crate::error::{PartioError, Result};
use crate::storage::ContentStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

/// FsContentStore keeps each backend in its own directory.
/// Blobs are stored at `{backend_dir}/parts/{part_id}`; a backend counts as
/// available while its directory exists.
pub struct FsContentStore {
    backends: BTreeMap<String, PathBuf>,
}

impl FsContentStore {
    pub fn new<I, S>(backends: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, PathBuf)>,
        S: Into<String>,
    {
        let mut resolved = BTreeMap::new();
        for (address, path) in backends {
            std::fs::create_dir_all(path.join("parts"))?;
            resolved.insert(address.into(), path);
        }

        Ok(Self { backends: resolved })
    }

    fn backend_dir(&self, backend: &str) -> Result<&PathBuf> {
        self.backends
            .get(backend)
            .ok_or_else(|| PartioError::NotFound(format!("backend {}", backend)))
    }

    fn part_path(&self, part_id: Ulid, backend: &str) -> Result<PathBuf> {
        Ok(self
            .backend_dir(backend)?
            .join("parts")
            .join(part_id.to_string()))
    }
}

fn conflict(part_id: Ulid, backend: &str) -> PartioError {
    PartioError::Conflict(format!("part {} already stored on {}", part_id, backend))
}

async fn write_temp(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.sync_all().await
}

async fn discard_temp(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove temp file {}: {}", path.display(), error);
        }
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn list_available_backends(&self) -> Result<Vec<String>> {
        let mut available = Vec::with_capacity(self.backends.len());
        for (address, path) in &self.backends {
            if fs::try_exists(path.join("parts")).await? {
                available.push(address.clone());
            }
        }
        Ok(available)
    }

    async fn put(&self, part_id: Ulid, backend: &str, data: Bytes) -> Result<()> {
        let part_path = self.part_path(part_id, backend)?;

        if fs::try_exists(&part_path).await? {
            return Err(conflict(part_id, backend));
        }

        // Each writer gets its own temp file; the hard link publishes it only
        // if no other writer got there first.
        let temp_path = part_path.with_file_name(format!("{}.{}.tmp", part_id, Ulid::new()));
        if let Err(error) = write_temp(&temp_path, &data).await {
            discard_temp(&temp_path).await;
            return Err(error.into());
        }

        let published = fs::hard_link(&temp_path, &part_path).await;
        discard_temp(&temp_path).await;

        match published {
            Ok(()) => {
                tracing::debug!(
                    "Stored part {} on backend {} ({} bytes)",
                    part_id,
                    backend,
                    data.len()
                );
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(conflict(part_id, backend))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn get(&self, part_id: Ulid, backend: &str) -> Result<Bytes> {
        let part_path = self.part_path(part_id, backend)?;

        match fs::read(&part_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Err(
                PartioError::NotFound(format!("part {} on {}", part_id, backend)),
            ),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, part_id: Ulid, backend: &str) -> Result<()> {
        let part_path = self.part_path(part_id, backend)?;

        match fs::remove_file(&part_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
