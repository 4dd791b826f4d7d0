//! Storage modules for Partio
//!
//! SQLite metadata bookkeeping and the blob stores parts are written to.

pub mod content_store;
pub mod database;
pub mod fs_store;
pub mod memory_store;
pub mod metadata_store;

pub use content_store::ContentStore;
pub use database::Database;
pub use fs_store::FsContentStore;
pub use memory_store::InMemoryContentStore;
pub use metadata_store::{MetadataQueries, MetadataStore, TxMetadataStore};
