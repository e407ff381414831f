//! In-memory storage backend.
//!
//! Behaves like an object store: directories only exist as shared key
//! prefixes, so they disappear together with their last object and can never
//! be deleted on their own.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    BlobStore, ByteStream, ObjectMeta, StoreCapabilities, StreamingUpload, WriteMode,
    normalize_prefix,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::instrument;

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Bytes,
    modified: OffsetDateTime,
}

type Objects = Arc<RwLock<BTreeMap<String, MemoryObject>>>;

/// Process-local blob store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Objects,
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(format!(
            "not a valid object key: {key:?}"
        )));
    }
    Ok(())
}

/// Validate a directory prefix and return it with a trailing `/`, or empty
/// for the root.
fn dir_prefix(prefix: &str) -> StorageResult<String> {
    let prefix = normalize_prefix(prefix);
    if prefix.is_empty() {
        return Ok(String::new());
    }
    validate_key(prefix)?;
    Ok(format!("{prefix}/"))
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the modification time of an object.
    ///
    /// Lets callers backdate objects, e.g. to exercise age-based sweeps.
    pub async fn set_modified(&self, key: &str, modified: OffsetDateTime) -> StorageResult<()> {
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        object.modified = modified;
        Ok(())
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the backend holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    #[instrument(skip(self), fields(backend = "memory"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let dir = dir_prefix(key)?;
        let objects = self.objects.read().await;
        Ok(objects.contains_key(normalize_prefix(key))
            || objects.keys().any(|k| k.starts_with(&dir)))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        validate_key(key)?;
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            last_modified: object.modified,
        })
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn modified_time(&self, path: &str) -> StorageResult<OffsetDateTime> {
        let dir = dir_prefix(path)?;
        let objects = self.objects.read().await;
        if let Some(object) = objects.get(normalize_prefix(path)) {
            return Ok(object.modified);
        }
        // A directory is as recent as its newest object.
        objects
            .iter()
            .filter(|(k, _)| k.starts_with(&dir))
            .map(|(_, o)| o.modified)
            .max()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let data = self
            .objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(crate::traits::byte_stream(data))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn put_stream(
        &self,
        key: &str,
        mode: WriteMode,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        validate_key(key)?;
        Ok(Box::new(MemoryUpload {
            objects: self.objects.clone(),
            key: key.to_string(),
            mode,
            buffer: BytesMut::new(),
        }))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete_dir(&self, path: &str) -> StorageResult<()> {
        let dir = dir_prefix(path)?;
        if dir.is_empty() {
            return Err(StorageError::InvalidKey(
                "refusing to delete the storage root".to_string(),
            ));
        }
        let objects = self.objects.read().await;
        if objects.keys().any(|k| k.starts_with(&dir)) {
            return Err(StorageError::DirectoryNotEmpty(path.to_string()));
        }
        Err(StorageError::NotFound(path.to_string()))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        validate_key(from)?;
        validate_key(to)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(to) {
            return Err(StorageError::AlreadyExists(to.to_string()));
        }
        let object = objects
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        objects.insert(to.to_string(), object);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn list_files(&self, prefix: &str, recursive: bool) -> StorageResult<Vec<String>> {
        let dir = dir_prefix(prefix)?;
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|k| {
                k.strip_prefix(&dir)
                    .is_some_and(|rest| recursive || !rest.contains('/'))
            })
            .cloned()
            .collect())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn list_directories(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<String>> {
        let dir = dir_prefix(prefix)?;
        let objects = self.objects.read().await;
        let mut dirs = BTreeSet::new();
        for key in objects.keys() {
            let Some(rest) = key.strip_prefix(&dir) else {
                continue;
            };
            // Every `/` in the remainder closes one directory level.
            for (pos, _) in rest.match_indices('/') {
                dirs.insert(format!("{dir}{}", &rest[..pos]));
                if !recursive {
                    break;
                }
            }
        }
        Ok(dirs.into_iter().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            streaming: true,
            append: true,
        }
    }
}

/// Buffered upload; nothing becomes visible until `finish`.
struct MemoryUpload {
    objects: Objects,
    key: String,
    mode: WriteMode,
    buffer: BytesMut,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let written = self.buffer.len() as u64;
        let mut objects = self.objects.write().await;
        let data = match (self.mode, objects.get(&self.key)) {
            (WriteMode::Append, Some(existing)) => {
                let mut joined = BytesMut::with_capacity(existing.data.len() + self.buffer.len());
                joined.extend_from_slice(&existing.data);
                joined.extend_from_slice(&self.buffer);
                joined.freeze()
            }
            _ => self.buffer.freeze(),
        };
        objects.insert(
            self.key,
            MemoryObject {
                data,
                modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_overwrite() {
        let backend = MemoryBackend::new();

        backend.put("s/0_f", Bytes::from("ab")).await.unwrap();
        let mut upload = backend.put_stream("s/0_f", WriteMode::Append).await.unwrap();
        upload.write(Bytes::from("cd")).await.unwrap();
        upload.finish().await.unwrap();
        assert_eq!(backend.get("s/0_f").await.unwrap(), Bytes::from("abcd"));

        let mut upload = backend.put_stream("s/0_f", WriteMode::Overwrite).await.unwrap();
        upload.write(Bytes::from("x")).await.unwrap();
        upload.finish().await.unwrap();
        assert_eq!(backend.get("s/0_f").await.unwrap(), Bytes::from("x"));
    }

    #[tokio::test]
    async fn test_abort_discards_buffer() {
        let backend = MemoryBackend::new();

        backend.put("k", Bytes::from("keep")).await.unwrap();
        let mut upload = backend.put_stream("k", WriteMode::Append).await.unwrap();
        upload.write(Bytes::from("lost")).await.unwrap();
        upload.abort().await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Bytes::from("keep"));
    }

    #[tokio::test]
    async fn test_implicit_directories() {
        let backend = MemoryBackend::new();

        backend.put("p/a/x", Bytes::from("1")).await.unwrap();
        backend.put("p/a/t/y", Bytes::from("2")).await.unwrap();
        backend.put("p/b/z", Bytes::from("3")).await.unwrap();

        assert_eq!(backend.list_directories("p", false).await.unwrap(), vec!["p/a", "p/b"]);
        assert_eq!(
            backend.list_directories("p/", true).await.unwrap(),
            vec!["p/a", "p/a/t", "p/b"]
        );
        assert_eq!(backend.list_files("p/a", false).await.unwrap(), vec!["p/a/x"]);
        assert!(backend.exists("p/a").await.unwrap());

        let err = backend.delete_dir("p/b").await.unwrap_err();
        assert!(matches!(err, StorageError::DirectoryNotEmpty(_)), "{err:?}");

        backend.delete("p/b/z").await.unwrap();
        assert!(!backend.exists("p/b").await.unwrap());
        assert!(backend.delete_dir("p/b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_directory_modified_time_tracks_newest_object() {
        let backend = MemoryBackend::new();
        let old = OffsetDateTime::now_utc() - time::Duration::days(3);

        backend.put("d/one", Bytes::from("1")).await.unwrap();
        backend.put("d/two", Bytes::from("2")).await.unwrap();
        backend.set_modified("d/one", old).await.unwrap();
        backend.set_modified("d/two", old).await.unwrap();
        assert_eq!(backend.modified_time("d").await.unwrap(), old);

        backend.put("d/three", Bytes::from("3")).await.unwrap();
        assert!(backend.modified_time("d").await.unwrap() > old);
    }

    #[tokio::test]
    async fn test_rename_semantics() {
        let backend = MemoryBackend::new();

        backend.put("a", Bytes::from("1")).await.unwrap();
        backend.put("b", Bytes::from("2")).await.unwrap();
        assert!(matches!(
            backend.rename("a", "b").await,
            Err(StorageError::AlreadyExists(_))
        ));
        backend.rename("a", "c").await.unwrap();
        assert_eq!(backend.get("c").await.unwrap(), Bytes::from("1"));
        assert!(backend.rename("a", "d").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let backend = MemoryBackend::new();
        for bad in ["", "/abs", "a//b", "a/../b", "a\\b"] {
            assert!(backend.put(bad, Bytes::new()).await.is_err(), "accepted {bad:?}");
        }
        assert!(backend.list_files("../x", true).await.is_err());
    }
}
