use partio_core::{
    ContentStore, DEFAULT_DANGLING_TTL, DEFAULT_PART_COUNT, FsContentStore, InMemoryContentStore,
    PartioError, Result, UploadConfig,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub upload: UploadSection,
    pub content: ContentConfig,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cleanup_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSection {
    #[serde(default = "default_part_count")]
    pub part_count: usize,
    #[serde(default = "default_dangling_ttl_secs")]
    pub dangling_ttl_secs: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            part_count: default_part_count(),
            dangling_ttl_secs: default_dangling_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    pub kind: ContentKind,
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub address: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_part_count() -> usize {
    DEFAULT_PART_COUNT
}

fn default_dangling_ttl_secs() -> u64 {
    DEFAULT_DANGLING_TTL.as_secs()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 * 1024 + 1024
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("PARTIO").separator("__"))
            .build()
            .map_err(|e| PartioError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| PartioError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            part_count: self.upload.part_count,
            dangling_ttl: Duration::from_secs(self.upload.dangling_ttl_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn build_content_store(&self) -> Result<Arc<dyn ContentStore>> {
        let addresses = self
            .content
            .backends
            .iter()
            .map(|backend| backend.address.trim().to_string());

        match self.content.kind {
            ContentKind::Memory => Ok(Arc::new(InMemoryContentStore::new(addresses))),
            ContentKind::Filesystem => {
                let mut backends = Vec::with_capacity(self.content.backends.len());
                for backend in &self.content.backends {
                    let path = backend.path.clone().ok_or_else(|| {
                        PartioError::Config(format!(
                            "backend '{}' needs a path for the filesystem content store",
                            backend.address
                        ))
                    })?;
                    backends.push((backend.address.trim().to_string(), path));
                }
                Ok(Arc::new(FsContentStore::new(backends)?))
            }
        }
    }
}
