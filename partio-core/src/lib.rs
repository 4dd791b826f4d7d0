//! Partio Core - multipart uploads spread across independent storage backends
//!
//! A file is split into a fixed number of parts, each written to one backend:
//! - SQLite metadata tracks every upload and part lifecycle
//! - The upload and its part rows are created in one transaction
//! - Parts are transferred sequentially and marked done one by one
//! - Uploads left in progress past a TTL are garbage-collected whole

pub mod cancel;
pub mod config;
pub mod distributor;
pub mod error;
pub mod model;
pub mod operations;
pub mod orchestrator;
pub mod storage;
pub mod transaction;

pub use cancel::{CancelHandle, Cancellation};
pub use config::{DEFAULT_DANGLING_TTL, DEFAULT_PART_COUNT, UploadConfig};
pub use distributor::{PartPlan, part_sizes, plan_parts};
pub use error::{ErrorKind, PartioError, Result, ResultExt};
pub use model::{Part, TransferStatus, Upload, parse_upload_id};
pub use orchestrator::UploadOrchestrator;
pub use storage::{
    ContentStore, Database, FsContentStore, InMemoryContentStore, MetadataQueries,
    MetadataStore, TxMetadataStore,
};
pub use transaction::TransactionRunner;
