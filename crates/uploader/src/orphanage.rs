//! Orphanage: a per-session staging area for finished uploads.
//!
//! Files land in `{directory}/{web_session_id}/{upload_type}` inside the
//! chunk store and wait there until the application promotes them to their
//! real destination. Whatever is never promoted is swept by age.

use crate::chunks::ChunkStorage;
use crate::destination::{BlobStorage, DestinationStorage};
use crate::error::{UploaderError, UploaderResult};
use crate::file::StoredFile;
use crate::report::{PromotionReport, SkippedFile, SweepReport};
use crate::session::WebSession;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use stitch_core::{OrphanageConfig, SessionId, validate_original_name};
use time::Duration;
use tracing::{debug, info, instrument, warn};

pub struct OrphanageStorage {
    storage: BlobStorage,
    chunks: ChunkStorage,
    destination: Arc<dyn DestinationStorage>,
    session: Arc<dyn WebSession>,
    directory: String,
    upload_type: String,
}

impl fmt::Debug for OrphanageStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrphanageStorage")
            .field("directory", &self.directory)
            .field("upload_type", &self.upload_type)
            .field("chunks", &self.chunks)
            .finish_non_exhaustive()
    }
}

impl OrphanageStorage {
    /// Stage uploads of `upload_type` in the chunk store, promoting them to
    /// `destination` later.
    pub fn new(
        destination: Arc<dyn DestinationStorage>,
        session: Arc<dyn WebSession>,
        chunks: &ChunkStorage,
        config: &OrphanageConfig,
        upload_type: impl Into<String>,
    ) -> UploaderResult<Self> {
        config.validate().map_err(UploaderError::Config)?;
        let upload_type = upload_type.into();
        validate_original_name(&upload_type)
            .map_err(|e| UploaderError::Config(format!("upload type: {e}")))?;
        Ok(Self {
            storage: BlobStorage::new(chunks.store().clone())?,
            chunks: chunks.clone(),
            destination,
            session,
            directory: config.directory.trim_end_matches('/').to_string(),
            upload_type,
        })
    }

    pub fn upload_type(&self) -> &str {
        &self.upload_type
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// `{directory}/{session_id}/{upload_type}` for the current session.
    fn namespace(&self) -> UploaderResult<String> {
        if !self.session.is_active() {
            return Err(UploaderError::SessionNotAvailable);
        }
        let session_id = SessionId::parse(&self.session.id())?;
        Ok(format!(
            "{}/{}/{}",
            self.directory, session_id, self.upload_type
        ))
    }

    /// Move a finished file into the session's orphanage.
    #[instrument(skip(self, file), fields(upload_type = %self.upload_type, source = %file.path()))]
    pub async fn upload(&self, file: StoredFile, name: &str) -> UploaderResult<StoredFile> {
        let namespace = self.namespace()?;
        let stored = self.storage.upload_to(file, name, Some(&namespace)).await?;
        debug!(key = %stored.path(), "Orphaned file");
        Ok(stored)
    }

    /// Files waiting in the session's orphanage, keyed by full path.
    pub async fn get_files(&self) -> UploaderResult<BTreeMap<String, StoredFile>> {
        let namespace = self.namespace()?;
        let keys = self.chunks.store().list_files(&namespace, false).await?;
        Ok(keys
            .into_iter()
            .map(|key| {
                let file = StoredFile::new(self.chunks.store().clone(), key.clone());
                (key, file)
            })
            .collect())
    }

    /// Promote orphans to the destination.
    ///
    /// Without `files` the session's orphanage is listed. Each file is
    /// stored under its key relative to the namespace. A file the
    /// destination refuses is reported and left in place, and the remaining
    /// files are still attempted.
    #[instrument(skip(self, files), fields(upload_type = %self.upload_type))]
    pub async fn upload_files(
        &self,
        files: Option<BTreeMap<String, StoredFile>>,
    ) -> PromotionReport {
        let pending = match files {
            Some(files) => self.namespace().map(|namespace| (namespace, files)),
            None => match self.namespace() {
                Ok(namespace) => self.get_files().await.map(|files| (namespace, files)),
                Err(e) => Err(e),
            },
        };
        let (namespace, files) = match pending {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Cannot list orphans");
                return PromotionReport::failed(e);
            }
        };

        let mut report = PromotionReport::default();
        for (key, file) in files {
            let target = key
                .strip_prefix(namespace.as_str())
                .unwrap_or(&key)
                .trim_start_matches('/')
                .to_string();
            match self.destination.upload(file, &target).await {
                Ok(stored) => report.promoted.push(stored),
                Err(e) => {
                    warn!(key = %key, error = %e, "Destination refused orphan");
                    report.skipped.push(SkippedFile { key, error: e });
                }
            }
        }

        info!(
            promoted = report.promoted.len(),
            skipped = report.skipped.len(),
            "Promoted orphans"
        );
        report
    }

    /// Sweep orphans of every session older than `max_age`.
    pub async fn clear(&self, max_age: Duration) -> UploaderResult<SweepReport> {
        self.chunks.clear(max_age, Some(&self.directory)).await
    }
}
