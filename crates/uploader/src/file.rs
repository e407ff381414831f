//! Handles to stored files.

use crate::error::UploaderResult;
use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use stitch_storage::{BlobStore, ByteStream, WriteMode};
use time::OffsetDateTime;
use tracing::warn;

/// A file at a key inside a particular blob store.
///
/// The handle is cheap to clone and carries no content; reads go to the
/// store on demand.
#[derive(Clone)]
pub struct StoredFile {
    store: Arc<dyn BlobStore>,
    path: String,
}

impl StoredFile {
    pub fn new(store: Arc<dyn BlobStore>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    /// Full key of the file within its store.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last segment of the key.
    pub fn name(&self) -> &str {
        stitch_core::file_name(&self.path)
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Whether this file lives in the given store instance.
    pub fn is_in(&self, store: &Arc<dyn BlobStore>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.store), Arc::as_ptr(store))
    }

    pub async fn exists(&self) -> UploaderResult<bool> {
        Ok(self.store.exists(&self.path).await?)
    }

    /// Size in bytes.
    pub async fn size(&self) -> UploaderResult<u64> {
        Ok(self.store.head(&self.path).await?.size)
    }

    pub async fn modified(&self) -> UploaderResult<OffsetDateTime> {
        Ok(self.store.modified_time(&self.path).await?)
    }

    /// Open the content as a byte stream.
    pub async fn stream(&self) -> UploaderResult<ByteStream> {
        Ok(self.store.get_stream(&self.path).await?)
    }

    /// Read the whole content into memory.
    pub async fn bytes(&self) -> UploaderResult<Bytes> {
        Ok(self.store.get(&self.path).await?)
    }
}

impl fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredFile")
            .field("backend", &self.store.backend_name())
            .field("path", &self.path)
            .finish()
    }
}

/// Pipe a byte stream into a streaming write.
///
/// On any read or write error the upload is aborted, which leaves the
/// target as it was before the write began.
pub(crate) async fn write_stream(
    store: &dyn BlobStore,
    key: &str,
    mode: WriteMode,
    mut payload: ByteStream,
) -> UploaderResult<u64> {
    let mut upload = store.put_stream(key, mode).await?;
    while let Some(next) = payload.next().await {
        let written = match next {
            Ok(bytes) => upload.write(bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(abort_err) = upload.abort().await {
                warn!(key = %key, error = %abort_err, "Failed to abort streaming write");
            }
            return Err(e.into());
        }
    }
    Ok(upload.finish().await?)
}
