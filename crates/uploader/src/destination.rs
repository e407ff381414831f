//! Destinations for promoted files, and the blob-store destination.

use crate::error::{UploaderError, UploaderResult};
use crate::file::{StoredFile, write_stream};
use async_trait::async_trait;
use std::sync::Arc;
use stitch_core::config::validate_prefix;
use stitch_storage::{BlobStore, WriteMode};
use tracing::{debug, instrument, warn};

/// Where files end up once they leave the orphanage.
#[async_trait]
pub trait DestinationStorage: Send + Sync {
    /// Store `file` under `name`, consuming the source.
    async fn upload(&self, file: StoredFile, name: &str) -> UploaderResult<StoredFile>;
}

/// Reject stores that cannot stream appends.
pub(crate) fn require_streaming(store: &dyn BlobStore) -> UploaderResult<()> {
    let caps = store.capabilities();
    if !caps.streaming || !caps.append {
        return Err(UploaderError::Config(format!(
            "the {} backend does not support streaming appends",
            store.backend_name()
        )));
    }
    Ok(())
}

/// A destination backed by a blob store, optionally under a directory.
#[derive(Clone)]
pub struct BlobStorage {
    store: Arc<dyn BlobStore>,
    directory: Option<String>,
}

impl BlobStorage {
    pub fn new(store: Arc<dyn BlobStore>) -> UploaderResult<Self> {
        require_streaming(store.as_ref())?;
        Ok(Self {
            store,
            directory: None,
        })
    }

    /// Place every upload under `directory`.
    pub fn with_directory(mut self, directory: impl Into<String>) -> UploaderResult<Self> {
        let directory = directory.into();
        validate_prefix("destination directory", &directory).map_err(UploaderError::Config)?;
        self.directory = Some(directory.trim_end_matches('/').to_string());
        Ok(self)
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Move `file` to `{directory}/{path}/{name}`.
    ///
    /// Files already in this store are renamed. Anything else is copied as a
    /// stream and the source removed. An existing file at the target is
    /// replaced.
    #[instrument(skip(self, file), fields(backend = self.store.backend_name(), source = %file.path()))]
    pub async fn upload_to(
        &self,
        file: StoredFile,
        name: &str,
        path: Option<&str>,
    ) -> UploaderResult<StoredFile> {
        validate_prefix("file name", name).map_err(UploaderError::InvalidName)?;
        if let Some(path) = path {
            validate_prefix("target path", path).map_err(UploaderError::InvalidName)?;
        }
        let key = [self.directory.as_deref(), path, Some(name)]
            .into_iter()
            .flatten()
            .map(|segment| segment.trim_end_matches('/'))
            .collect::<Vec<_>>()
            .join("/");

        if file.is_in(&self.store) {
            if file.path() == key {
                return Ok(file);
            }
            self.remove_stale(&key).await?;
            self.store.rename(file.path(), &key).await?;
        } else {
            let payload = file.stream().await?;
            let written =
                write_stream(self.store.as_ref(), &key, WriteMode::Overwrite, payload).await?;
            debug!(key = %key, bytes = written, "Copied file across stores");
            if let Err(e) = file.store().delete(file.path()).await {
                warn!(error = %e, "Copied file but could not remove the source");
            }
        }

        debug!(key = %key, "Stored file");
        Ok(StoredFile::new(self.store.clone(), key))
    }

    async fn remove_stale(&self, key: &str) -> UploaderResult<()> {
        match self.store.delete(key).await {
            Ok(()) => {
                debug!(key = %key, "Replaced existing file");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DestinationStorage for BlobStorage {
    async fn upload(&self, file: StoredFile, name: &str) -> UploaderResult<StoredFile> {
        self.upload_to(file, name, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use stitch_storage::MemoryBackend;

    fn memory() -> Arc<dyn BlobStore> {
        Arc::new(MemoryBackend::new())
    }

    #[tokio::test]
    async fn test_upload_within_store_renames() {
        let store = memory();
        store.put("in/a.txt", Bytes::from_static(b"a")).await.unwrap();
        let storage = BlobStorage::new(store.clone())
            .unwrap()
            .with_directory("uploads")
            .unwrap();

        let stored = storage
            .upload_to(StoredFile::new(store.clone(), "in/a.txt"), "a.txt", Some("docs"))
            .await
            .unwrap();

        assert_eq!(stored.path(), "uploads/docs/a.txt");
        assert!(!store.exists("in/a.txt").await.unwrap());
        assert_eq!(stored.bytes().await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_upload_across_stores_copies_and_removes_source() {
        let source = memory();
        source.put("tmp/b.bin", Bytes::from_static(b"bbb")).await.unwrap();
        let target = memory();
        let storage = BlobStorage::new(target.clone()).unwrap();

        let stored = storage
            .upload(StoredFile::new(source.clone(), "tmp/b.bin"), "b.bin")
            .await
            .unwrap();

        assert_eq!(stored.path(), "b.bin");
        assert!(stored.is_in(&target));
        assert_eq!(target.get("b.bin").await.unwrap(), Bytes::from_static(b"bbb"));
        assert!(!source.exists("tmp/b.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_replaces_existing_target() {
        let store = memory();
        store.put("x/new", Bytes::from_static(b"new")).await.unwrap();
        store.put("dest/file", Bytes::from_static(b"old")).await.unwrap();
        let storage = BlobStorage::new(store.clone()).unwrap();

        storage
            .upload_to(StoredFile::new(store.clone(), "x/new"), "file", Some("dest"))
            .await
            .unwrap();
        assert_eq!(store.get("dest/file").await.unwrap(), Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_upload_rejects_traversal_names() {
        let store = memory();
        let storage = BlobStorage::new(store.clone()).unwrap();
        let err = storage
            .upload(StoredFile::new(store, "a"), "../escape")
            .await
            .unwrap_err();
        assert!(matches!(err, UploaderError::InvalidName(_)));
    }
}
