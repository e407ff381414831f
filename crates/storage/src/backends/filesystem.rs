//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    BlobStore, ByteStream, ObjectMeta, StoreCapabilities, StreamingUpload, WriteMode,
    normalize_prefix,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Marker inside the name of in-flight overwrite uploads.
const TEMP_MARKER: &str = ".tmp.";

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
    /// Temp files of overwrite uploads that never finished.
    Incomplete,
}

fn map_not_found(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

fn file_kind(path: &Path) -> EntryKind {
    if is_temp_file(path) {
        EntryKind::Incomplete
    } else {
        EntryKind::File
    }
}

/// Whether a file name belongs to an unfinished overwrite upload.
fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let n = n.to_string_lossy();
            n.starts_with('.') && n.contains(TEMP_MARKER)
        })
        .unwrap_or(false)
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs the validation on the blocking pool since it canonicalizes and
    /// stats paths.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation.
    ///
    /// Returns an error if the key would escape the storage root, including
    /// through symlinks placed inside it.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }

        let path = root.join(key);

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Existing paths (and symlinks, even broken ones) must resolve inside the root.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }

                // Keep the non-canonical path so listings can strip `root`.
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // New paths: the nearest existing ancestor must resolve inside the root,
        // otherwise create_dir_all would follow a symlinked directory out of it.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Convert an absolute path below the root back into a `/`-separated key.
    fn relative_key(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Walk the tree under `prefix`, collecting files or directories.
    async fn walk(
        &self,
        prefix: &str,
        recursive: bool,
        kind: EntryKind,
    ) -> StorageResult<Vec<String>> {
        let base_path = self.key_path(normalize_prefix(prefix)).await?;
        let mut results = Vec::new();

        match fs::metadata(&base_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(results),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![base_path];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks, so links are never traversed.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if kind == EntryKind::Directory
                        && let Some(key) = self.relative_key(&path)
                    {
                        results.push(key);
                    }
                    if recursive {
                        stack.push(path);
                    }
                } else if file_type.is_file()
                    && kind == file_kind(&path)
                    && let Some(key) = self.relative_key(&path)
                {
                    results.push(key);
                }
            }
        }

        results.sort();
        Ok(results)
    }

    fn temp_path_for(path: &Path) -> PathBuf {
        // Unique per upload so concurrent overwrites of one key don't collide.
        let temp_name = format!(
            ".{}{}{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            TEMP_MARKER,
            Uuid::new_v4()
        );
        path.with_file_name(temp_name)
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(map_not_found(key))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified()?.into(),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn modified_time(&self, path: &str) -> StorageResult<OffsetDateTime> {
        let full = self.key_path(path).await?;
        let metadata = fs::metadata(&full).await.map_err(map_not_found(path))?;
        Ok(metadata.modified()?.into())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.key_path(key).await?;
        let file = fs::File::open(&path).await.map_err(map_not_found(key))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(
        &self,
        key: &str,
        mode: WriteMode,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        match mode {
            WriteMode::Overwrite => {
                let temp_path = Self::temp_path_for(&path);
                let file = fs::File::create(&temp_path).await?;
                Ok(Box::new(FilesystemUpload {
                    file,
                    target: UploadTarget::Replace {
                        temp_path,
                        final_path: path,
                    },
                    bytes_written: 0,
                }))
            }
            WriteMode::Append => {
                let file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                let original_len = file.metadata().await?.len();
                Ok(Box::new(FilesystemUpload {
                    file,
                    target: UploadTarget::Append { original_len },
                    bytes_written: 0,
                }))
            }
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path).await.map_err(map_not_found(key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_dir(&self, path: &str) -> StorageResult<()> {
        let full = self.key_path(normalize_prefix(path)).await?;
        if full == self.root {
            return Err(StorageError::InvalidKey(
                "refusing to delete the storage root".to_string(),
            ));
        }
        fs::remove_dir(&full).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            std::io::ErrorKind::DirectoryNotEmpty => {
                StorageError::DirectoryNotEmpty(path.to_string())
            }
            _ => StorageError::Io(e),
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.key_path(from).await?;
        let to_path = self.key_path(to).await?;

        if !fs::try_exists(&from_path).await? {
            return Err(StorageError::NotFound(from.to_string()));
        }
        // fs::rename silently replaces the destination on unix.
        if fs::try_exists(&to_path).await? {
            return Err(StorageError::AlreadyExists(to.to_string()));
        }

        self.ensure_parent(&to_path).await?;
        fs::rename(&from_path, &to_path)
            .await
            .map_err(map_not_found(from))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_files(&self, prefix: &str, recursive: bool) -> StorageResult<Vec<String>> {
        self.walk(prefix, recursive, EntryKind::File).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_directories(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<String>> {
        self.walk(prefix, recursive, EntryKind::Directory).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_incomplete(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<String>> {
        self.walk(prefix, recursive, EntryKind::Incomplete).await
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            streaming: true,
            append: true,
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

enum UploadTarget {
    /// Written to a temp file, renamed over the destination on finish.
    Replace {
        temp_path: PathBuf,
        final_path: PathBuf,
    },
    /// Written in place; abort truncates back to the starting length.
    Append { original_len: u64 },
}

/// Streaming upload for filesystem backend.
struct FilesystemUpload {
    file: fs::File,
    target: UploadTarget,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        if let UploadTarget::Replace {
            temp_path,
            final_path,
        } = &self.target
        {
            fs::rename(temp_path, final_path).await?;
        }
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        match self.target {
            UploadTarget::Replace { temp_path, .. } => {
                drop(self.file);
                if let Err(e) = fs::remove_file(&temp_path).await
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(
                        path = %temp_path.display(),
                        error = %e,
                        "Failed to remove temp file of aborted upload"
                    );
                }
            }
            UploadTarget::Append { original_len } => {
                self.file.flush().await?;
                self.file.set_len(original_len).await?;
            }
        }
        Ok(())
    }
}
