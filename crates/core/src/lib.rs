//! Core domain types and shared logic for stitch chunked uploads.
//!
//! This crate defines the pieces every other crate agrees on:
//! - Upload session identifiers
//! - Chunk naming rules (`{index}_{name}`) and assembly ordering
//! - Configuration types for storage, chunks and the orphanage

pub mod chunk;
pub mod config;
pub mod error;
pub mod upload;

pub use chunk::{
    assembly_order, chunk_file_name, file_name, is_chunk_name, parse_chunk_index,
    sort_chunk_names, strip_chunk_prefix, validate_original_name,
};
pub use config::{AppConfig, ChunkConfig, OrphanageConfig, StorageConfig};
pub use error::{Error, Result};
pub use upload::SessionId;

/// Default age after which abandoned chunks and orphans are swept: one week.
pub const DEFAULT_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Default key prefix for chunk sets.
pub const DEFAULT_CHUNK_PREFIX: &str = "chunks";

/// Default key prefix for the orphanage.
pub const DEFAULT_ORPHANAGE_DIRECTORY: &str = "orphanage";
