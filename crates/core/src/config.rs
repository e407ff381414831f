//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// Process-local storage. Contents are lost on exit.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/uploads"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty path".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Chunk storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Key prefix under which chunk sets are stored.
    #[serde(default = "default_chunk_prefix")]
    pub prefix: String,
    /// Age in seconds after which abandoned chunk sets are swept.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            prefix: default_chunk_prefix(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl ChunkConfig {
    /// Get the sweep age as a Duration.
    pub fn max_age(&self) -> Duration {
        secs_to_duration(self.max_age_secs)
    }

    /// Validate chunk configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        validate_prefix("chunks.prefix", &self.prefix)
    }
}

/// Orphanage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrphanageConfig {
    /// Key prefix holding per-session orphaned files.
    #[serde(default = "default_orphanage_directory")]
    pub directory: String,
    /// Age in seconds after which unpromoted orphans are swept.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for OrphanageConfig {
    fn default() -> Self {
        Self {
            directory: default_orphanage_directory(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl OrphanageConfig {
    /// Get the sweep age as a Duration.
    pub fn max_age(&self) -> Duration {
        secs_to_duration(self.max_age_secs)
    }

    /// Validate orphanage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        validate_prefix("orphanage.directory", &self.directory)
    }
}

fn default_chunk_prefix() -> String {
    crate::DEFAULT_CHUNK_PREFIX.to_string()
}

fn default_orphanage_directory() -> String {
    crate::DEFAULT_ORPHANAGE_DIRECTORY.to_string()
}

fn default_max_age_secs() -> u64 {
    crate::DEFAULT_MAX_AGE_SECS
}

fn secs_to_duration(secs: u64) -> Duration {
    // Saturate at i64::MAX to prevent overflow wrapping to negative
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Check that a key prefix is relative and free of traversal components.
pub fn validate_prefix(field: &str, prefix: &str) -> Result<(), String> {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(format!("{field} must be relative: {prefix}"));
    }
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(format!("{field} contains an unsafe segment: {prefix}"));
    }
    Ok(())
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chunk storage configuration.
    #[serde(default)]
    pub chunks: ChunkConfig,
    /// Orphanage configuration.
    #[serde(default)]
    pub orphanage: OrphanageConfig,
}

impl AppConfig {
    /// Validate every section, reporting the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.chunks.validate()?;
        self.orphanage.validate()
    }
}
