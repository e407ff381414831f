//! Uploader error types.

use stitch_storage::StorageError;
use thiserror::Error;

/// Errors raised by chunk assembly, the orphanage and destinations.
#[derive(Debug, Error)]
pub enum UploaderError {
    /// Raised at construction, e.g. for a store without streaming appends.
    #[error("configuration error: {0}")]
    Config(String),

    /// The orphanage was used without an active web session.
    #[error("session not available: the orphanage requires an active web session")]
    SessionNotAvailable,

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("destination rejected {name}: {reason}")]
    Destination { name: String, reason: String },

    #[error(transparent)]
    Core(#[from] stitch_core::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for uploader operations.
pub type UploaderResult<T> = std::result::Result<T, UploaderError>;
