//! Outcomes of sweeps and promotions.

use crate::error::UploaderError;
use crate::file::StoredFile;
use serde::Serialize;

/// What a sweep removed under a prefix.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
    pub prefix: String,
    pub files_deleted: usize,
    pub directories_deleted: usize,
    /// Expired directories that could not be removed, usually because they
    /// still held fresh files.
    pub directories_skipped: Vec<SkippedDirectory>,
}

impl SweepReport {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedDirectory {
    pub path: String,
    pub reason: String,
}

/// Result of promoting a session's orphans.
#[derive(Debug, Default)]
pub struct PromotionReport {
    /// Files now held by the destination, in listing order.
    pub promoted: Vec<StoredFile>,
    /// Files the destination refused. They stay in the orphanage.
    pub skipped: Vec<SkippedFile>,
    /// Set when the orphanage could not be listed at all.
    pub listing_error: Option<UploaderError>,
}

impl PromotionReport {
    pub(crate) fn failed(error: UploaderError) -> Self {
        Self {
            listing_error: Some(error),
            ..Self::default()
        }
    }

    /// Whether every listed file was promoted.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.listing_error.is_none()
    }

    pub fn into_promoted(self) -> Vec<StoredFile> {
        self.promoted
    }
}

/// A file left behind by a promotion.
#[derive(Debug)]
pub struct SkippedFile {
    pub key: String,
    pub error: UploaderError,
}
