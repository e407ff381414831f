#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use stitch_core::SessionId;
use stitch_storage::{
    BlobStore, ByteStream, FilesystemBackend, MemoryBackend, ObjectMeta, StorageError,
    StorageResult, StoreCapabilities, StreamingUpload, WriteMode,
};
use stitch_uploader::{
    BlobStorage, DestinationStorage, StoredFile, UploaderError, UploaderResult,
};
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};

pub fn session(id: &str) -> SessionId {
    SessionId::parse(id).unwrap()
}

/// A filesystem store in a fresh temp dir and a memory store.
pub async fn stores() -> (TempDir, Vec<Arc<dyn BlobStore>>) {
    let dir = TempDir::new().unwrap();
    let filesystem = FilesystemBackend::new(dir.path()).await.unwrap();
    (
        dir,
        vec![Arc::new(filesystem), Arc::new(MemoryBackend::new())],
    )
}

/// Deterministic pseudo-random test data.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect::<Vec<u8>>()
        .into()
}

/// Stream `data` in pieces of at most `piece` bytes.
pub fn payload(data: Bytes, piece: usize) -> ByteStream {
    Box::pin(async_stream::stream! {
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + piece).min(data.len());
            yield Ok::<Bytes, StorageError>(data.slice(offset..end));
            offset = end;
        }
    })
}

/// Stream `data`, then fail as if the client disconnected.
pub fn broken_payload(data: Bytes) -> ByteStream {
    Box::pin(async_stream::stream! {
        yield Ok::<Bytes, StorageError>(data);
        yield Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client disconnected",
        )));
    })
}

/// Move an object's modification time into the past.
pub async fn backdate(backend: &MemoryBackend, key: &str, age: Duration) {
    backend
        .set_modified(key, OffsetDateTime::now_utc() - age)
        .await
        .unwrap();
}

/// A memory store that claims no append support, like a plain object store.
#[derive(Clone, Default)]
pub struct NoAppendBackend {
    inner: MemoryBackend,
}

#[async_trait]
impl BlobStore for NoAppendBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn modified_time(&self, path: &str) -> StorageResult<OffsetDateTime> {
        self.inner.modified_time(path).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put_stream(
        &self,
        key: &str,
        mode: WriteMode,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        if mode == WriteMode::Append {
            return Err(StorageError::Unsupported("append".to_string()));
        }
        self.inner.put_stream(key, mode).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn delete_dir(&self, path: &str) -> StorageResult<()> {
        self.inner.delete_dir(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner.rename(from, to).await
    }

    async fn list_files(&self, prefix: &str, recursive: bool) -> StorageResult<Vec<String>> {
        self.inner.list_files(prefix, recursive).await
    }

    async fn list_directories(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<String>> {
        self.inner.list_directories(prefix, recursive).await
    }

    fn backend_name(&self) -> &'static str {
        "no-append"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            streaming: true,
            append: false,
        }
    }
}

/// A destination that refuses the listed names and stores everything else.
pub struct PickyDestination {
    inner: BlobStorage,
    refused: BTreeSet<String>,
}

impl PickyDestination {
    pub fn new(store: Arc<dyn BlobStore>, refused: &[&str]) -> Self {
        Self {
            inner: BlobStorage::new(store).unwrap(),
            refused: refused.iter().map(|name| name.to_string()).collect(),
        }
    }
}

#[async_trait]
impl DestinationStorage for PickyDestination {
    async fn upload(&self, file: StoredFile, name: &str) -> UploaderResult<StoredFile> {
        if self.refused.contains(name) {
            return Err(UploaderError::Destination {
                name: name.to_string(),
                reason: "quota exceeded".to_string(),
            });
        }
        self.inner.upload(file, name).await
    }
}
