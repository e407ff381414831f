//! Blob storage abstraction and backends for stitch.
//!
//! This crate provides:
//! - The [`BlobStore`] trait: path-addressable blobs with streaming reads,
//!   overwrite/append streaming writes, rename, listings and timestamps
//! - Backends: local filesystem and in-memory

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{
    BlobStore, ByteStream, ObjectMeta, StoreCapabilities, StreamingUpload, WriteMode, byte_stream,
};

use stitch_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    let store: Arc<dyn BlobStore> = match config {
        StorageConfig::Filesystem { path } => Arc::new(FilesystemBackend::new(path).await?),
        StorageConfig::Memory => Arc::new(MemoryBackend::new()),
    };
    tracing::debug!(backend = store.backend_name(), "Blob store initialized");
    Ok(store)
}
