//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Wrap an in-memory buffer as a single-item byte stream.
pub fn byte_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// How a streaming write treats an existing object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the object. The previous content stays visible until the
    /// upload finishes.
    Overwrite,
    /// Add to the end of the object, creating it if missing.
    Append,
}

/// Optional features a backend supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Reads and writes can be streamed without buffering whole objects
    /// in the caller.
    pub streaming: bool,
    /// `put_stream` honours [`WriteMode::Append`].
    pub append: bool,
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: OffsetDateTime,
}

/// Path-addressable blob storage.
///
/// Keys are relative, `/`-separated paths. Directories are whatever the
/// backend makes of shared key prefixes: real directories on a filesystem,
/// implicit prefixes in an object store.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Check if an object or directory exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and modification time without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Modification time of an object or directory.
    async fn modified_time(&self, path: &str) -> StorageResult<OffsetDateTime>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Start a streaming write.
    async fn put_stream(
        &self,
        key: &str,
        mode: WriteMode,
    ) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete an empty directory.
    ///
    /// Fails with `DirectoryNotEmpty` while files remain, and with
    /// `NotFound` if the directory is already gone.
    async fn delete_dir(&self, path: &str) -> StorageResult<()>;

    /// Move an object to a new key. Never overwrites: an existing
    /// destination fails with `AlreadyExists`.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// List object keys under a directory prefix, sorted.
    async fn list_files(&self, prefix: &str, recursive: bool) -> StorageResult<Vec<String>>;

    /// List directory paths under a directory prefix, sorted.
    async fn list_directories(&self, prefix: &str, recursive: bool)
    -> StorageResult<Vec<String>>;

    /// List leftovers of writes that never finished, e.g. temp files of an
    /// overwrite interrupted by a crash.
    ///
    /// Ordinary listings hide these. Backends that stage writes in memory
    /// leave nothing behind and keep the default.
    async fn list_incomplete(
        &self,
        _prefix: &str,
        _recursive: bool,
    ) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g.
    /// "filesystem", "memory"). Used for logging.
    fn backend_name(&self) -> &'static str;

    /// Get the optional features of this backend.
    fn capabilities(&self) -> StoreCapabilities;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let mut stream = self.get_stream(key).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Put an object, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let mut upload = self.put_stream(key, WriteMode::Overwrite).await?;
        if let Err(e) = upload.write(data).await {
            if let Err(abort_err) = upload.abort().await {
                tracing::warn!(key = %key, error = %abort_err, "Failed to abort write");
            }
            return Err(e);
        }
        upload.finish().await?;
        Ok(())
    }

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the bytes written by this upload.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, leaving the object as it was before the upload
    /// started.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Normalize a directory prefix: strip trailing separators.
pub(crate) fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}
