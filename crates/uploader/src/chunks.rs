//! Chunk storage: accumulating chunks of resumable uploads.
//!
//! Every upload session gets a directory `{prefix}/{session_id}`. The first
//! chunk creates `{index}_{original_name}` there and every later chunk is
//! appended to that same blob, so the session holds one growing file rather
//! than one blob per chunk. On the final chunk the index prefix can be
//! stripped to give the file its client-facing name.

use crate::destination::require_streaming;
use crate::error::{UploaderError, UploaderResult};
use crate::file::{StoredFile, write_stream};
use crate::report::{SkippedDirectory, SweepReport};
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use stitch_core::config::validate_prefix;
use stitch_core::{
    ChunkConfig, SessionId, assembly_order, chunk_file_name, file_name, is_chunk_name,
    sort_chunk_names, strip_chunk_prefix, validate_original_name,
};
use stitch_storage::{BlobStore, ByteStream, WriteMode};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument, warn};

/// One chunk of a resumable upload, ready to be assembled.
pub struct Chunk {
    session_id: SessionId,
    index: u64,
    payload: ByteStream,
    original_name: String,
}

impl Chunk {
    pub fn new(
        session_id: SessionId,
        index: u64,
        payload: ByteStream,
        original_name: impl Into<String>,
    ) -> UploaderResult<Self> {
        let original_name = original_name.into();
        validate_original_name(&original_name)
            .map_err(|e| UploaderError::InvalidChunk(e.to_string()))?;
        Ok(Self {
            session_id,
            index,
            payload,
            original_name,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Blob name this chunk would carry on its own: `{index}_{original_name}`.
    pub fn file_name(&self) -> String {
        chunk_file_name(self.index, &self.original_name)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("session_id", &self.session_id)
            .field("index", &self.index)
            .field("original_name", &self.original_name)
            .finish_non_exhaustive()
    }
}

/// Chunk storage over a blob store that supports streaming appends.
#[derive(Clone)]
pub struct ChunkStorage {
    store: Arc<dyn BlobStore>,
    prefix: String,
}

impl fmt::Debug for ChunkStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStorage")
            .field("backend", &self.store.backend_name())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ChunkStorage {
    /// Create chunk storage under `prefix`.
    ///
    /// Fails with a configuration error when the store cannot stream appends
    /// or the prefix is not a safe relative path.
    pub fn new(store: Arc<dyn BlobStore>, prefix: impl Into<String>) -> UploaderResult<Self> {
        require_streaming(store.as_ref())?;
        let prefix = prefix.into();
        validate_prefix("chunk prefix", &prefix).map_err(UploaderError::Config)?;
        Ok(Self {
            store,
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(store: Arc<dyn BlobStore>, config: &ChunkConfig) -> UploaderResult<Self> {
        Self::new(store, config.prefix.clone())
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Directory holding a session's chunks.
    pub fn session_path(&self, session_id: &SessionId) -> String {
        format!("{}/{}", self.prefix, session_id)
    }

    /// Describe an incoming chunk. Nothing is written until assembly.
    pub fn add_chunk(
        &self,
        session_id: SessionId,
        index: u64,
        payload: ByteStream,
        original_name: &str,
    ) -> UploaderResult<Chunk> {
        Chunk::new(session_id, index, payload, original_name)
    }

    /// Write a chunk into the session's accumulating blob.
    ///
    /// `existing_chunks` names what the session directory already holds;
    /// its first name in assembly order is the blob being built. Index 0
    /// starts the blob afresh, any other index appends. With
    /// `is_final_chunk` and `remove_chunk_prefix_on_finish` the blob is then
    /// renamed to the bare original name, replacing a stale file of that
    /// name.
    ///
    /// Both flags are required for the rename. Passing only
    /// `remove_chunk_prefix_on_finish` on an intermediate chunk leaves the
    /// index prefix in place, so later chunks keep appending to the same
    /// blob.
    #[instrument(
        skip(self, chunk, existing_chunks),
        fields(session_id = %chunk.session_id, index = chunk.index)
    )]
    pub async fn assemble_chunks<S: AsRef<str>>(
        &self,
        chunk: Chunk,
        existing_chunks: &[S],
        remove_chunk_prefix_on_finish: bool,
        is_final_chunk: bool,
    ) -> UploaderResult<StoredFile> {
        let directory = self.session_path(&chunk.session_id);
        let target = match existing_chunks
            .iter()
            .map(|name| name.as_ref())
            .min_by(|a, b| assembly_order(a, b))
        {
            Some(first) => file_name(first).to_string(),
            None => chunk.file_name(),
        };
        let target_key = format!("{directory}/{target}");

        let mode = if chunk.index == 0 {
            WriteMode::Overwrite
        } else {
            WriteMode::Append
        };
        let written = write_stream(self.store.as_ref(), &target_key, mode, chunk.payload).await?;
        debug!(key = %target_key, bytes = written, ?mode, "Wrote chunk");

        if !(is_final_chunk && remove_chunk_prefix_on_finish) {
            return Ok(StoredFile::new(self.store.clone(), target_key));
        }

        let final_key = format!("{directory}/{}", strip_chunk_prefix(&target));
        if final_key == target_key {
            return Ok(StoredFile::new(self.store.clone(), target_key));
        }
        match self.store.delete(&final_key).await {
            Ok(()) => warn!(key = %final_key, "Replaced stale file from an earlier upload"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.store.rename(&target_key, &final_key).await?;
        info!(key = %final_key, "Assembled upload");
        Ok(StoredFile::new(self.store.clone(), final_key))
    }

    /// Chunk blobs in a session directory, in assembly order.
    ///
    /// Only direct children whose names carry an index prefix are returned,
    /// so a file already renamed on completion is not listed.
    pub async fn get_chunks(&self, session_id: &SessionId) -> UploaderResult<Vec<String>> {
        let mut paths: Vec<String> = self
            .store
            .list_files(&self.session_path(session_id), false)
            .await?
            .into_iter()
            .filter(|path| is_chunk_name(path))
            .collect();
        sort_chunk_names(&mut paths);
        Ok(paths)
    }

    /// Every file under `path`, including leftovers of interrupted writes.
    async fn files_under(&self, path: &str) -> UploaderResult<Vec<String>> {
        let mut files = self.store.list_files(path, true).await?;
        files.extend(self.store.list_incomplete(path, true).await?);
        Ok(files)
    }

    /// Remove a file, or a directory with everything under it.
    #[instrument(skip(self), fields(backend = self.store.backend_name()))]
    pub async fn cleanup(&self, path: &str) -> UploaderResult<()> {
        let files = self.files_under(path).await?;
        if files.is_empty() {
            if let Err(e) = self.store.delete(path).await {
                // Either nothing is there or `path` is an empty directory.
                if e.is_not_found() || !self.store.exists(path).await? {
                    return Err(e.into());
                }
                self.store.delete_dir(path).await?;
            }
            debug!("Removed");
            return Ok(());
        }

        let mut directories = self.store.list_directories(path, true).await?;
        for key in &files {
            self.store.delete(key).await?;
        }
        directories.sort_by_key(|dir| Reverse(depth(dir)));
        directories.push(path.trim_end_matches('/').to_string());
        for dir in &directories {
            match self.store.delete_dir(dir).await {
                Ok(()) => {}
                // Object stores drop prefixes along with their last file.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(files = files.len(), "Removed directory");
        Ok(())
    }

    /// Delete everything under `prefix` (default: the chunk prefix) last
    /// modified at least `max_age` ago.
    ///
    /// Expired directories are collected before any file is removed and are
    /// deleted deepest first once the files are gone. A directory that
    /// cannot be removed is recorded in the report, not treated as an error.
    #[instrument(skip(self), fields(backend = self.store.backend_name()))]
    pub async fn clear(
        &self,
        max_age: Duration,
        prefix: Option<&str>,
    ) -> UploaderResult<SweepReport> {
        let prefix = match prefix {
            Some(prefix) => {
                validate_prefix("sweep prefix", prefix).map_err(UploaderError::Config)?;
                prefix.trim_end_matches('/')
            }
            None => self.prefix.as_str(),
        };
        let now = OffsetDateTime::now_utc();
        let expired = |modified: OffsetDateTime| now - modified >= max_age;
        let mut report = SweepReport::new(prefix);

        let mut expired_dirs = Vec::new();
        for dir in self.store.list_directories(prefix, true).await? {
            match self.store.modified_time(&dir).await {
                Ok(modified) if expired(modified) => expired_dirs.push(dir),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        for key in self.files_under(prefix).await? {
            let modified = match self.store.modified_time(&key).await {
                Ok(modified) => modified,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            if expired(modified) {
                self.store.delete(&key).await?;
                report.files_deleted += 1;
            }
        }

        expired_dirs.sort_by_key(|dir| Reverse(depth(dir)));
        for dir in expired_dirs {
            match self.store.delete_dir(&dir).await {
                Ok(()) => report.directories_deleted += 1,
                Err(e) => {
                    debug!(path = %dir, error = %e, "Keeping directory");
                    report.directories_skipped.push(SkippedDirectory {
                        path: dir,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            prefix = %report.prefix,
            files_deleted = report.files_deleted,
            directories_deleted = report.directories_deleted,
            directories_skipped = report.directories_skipped.len(),
            "Sweep complete"
        );
        Ok(report)
    }
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}
