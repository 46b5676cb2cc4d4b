//! Storage backend for committed bundle files.
//!
//! The [`Storage`] trait is the seam between the [`PartCommitter`] and the
//! filesystem. [`LocalStorage`] maps bundle paths onto a directory tree and
//! keeps a file index (stable file ids, etags, stored checksums) in a
//! [`DashMap`] alongside it.
//!
//! Paths handed to a `Storage` are always normalized with [`normalize_path`]:
//! absolute, `/`-separated, with no empty, `.` or `..` segments.
//!
//! [`PartCommitter`]: crate::committer::PartCommitter

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use ruststack_bundle_model::BundleErrorCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Errors returned by a [`Storage`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The path is empty or escapes the storage root.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// The target already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The target does not exist.
    #[error("{0} does not exist")]
    NotFound(String),

    /// The parent collection of the target does not exist.
    #[error("parent collection of {0} does not exist")]
    MissingParent(String),

    /// The backend cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Unexpected I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being operated on.
        path: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// The error kind reported to the client.
    #[must_use]
    pub fn code(&self) -> BundleErrorCode {
        match self {
            Self::InvalidPath(_) => BundleErrorCode::BadRequest,
            Self::AlreadyExists(_) => BundleErrorCode::Forbidden,
            Self::NotFound(_) => BundleErrorCode::NotFound,
            Self::MissingParent(_) => BundleErrorCode::Conflict,
            Self::Unavailable(_) => BundleErrorCode::ServiceUnavailable,
            Self::Io { .. } => BundleErrorCode::InternalError,
        }
    }

    fn io(path: &str, source: io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// FileInfo
// ---------------------------------------------------------------------------

/// Index entry of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Stable identifier, kept across updates of the same path.
    pub file_id: u64,
    /// Version identifier, regenerated on every update.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in seconds since the epoch.
    pub mtime: i64,
    /// Stored checksum, if any.
    pub checksum: Option<String>,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Filesystem operations the part committer relies on.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Whether a file or collection exists at `path`.
    async fn file_exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Create a new file at `path` holding `content`, returning bytes written.
    ///
    /// Fails with [`StorageError::AlreadyExists`] if `path` exists. A partially
    /// written file is removed before an error is returned.
    async fn new_file(&self, path: &str, content: Bytes) -> Result<u64, StorageError>;

    /// Move `from` to `to`.
    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Remove the file at `path`.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Set the modification time of `path`.
    async fn touch(&self, path: &str, mtime: i64) -> Result<(), StorageError>;

    /// Refresh the index entry of `path` from the stored file.
    async fn update(&self, path: &str) -> Result<FileInfo, StorageError>;

    /// Store (or with `None`, clear) the checksum of `path`.
    async fn set_checksum(&self, path: &str, checksum: Option<&str>) -> Result<(), StorageError>;

    /// The index entry of `path`, if indexed.
    async fn file_info(&self, path: &str) -> Result<Option<FileInfo>, StorageError>;
}

/// Normalize a client-supplied path for use with a [`Storage`] backend.
///
/// # Errors
///
/// Returns [`StorageError::InvalidPath`] if the path is empty, contains a NUL
/// byte, or has a `..` segment.
pub fn normalize_path(raw: &str) -> Result<String, StorageError> {
    ruststack_bundle_model::normalize_path(raw).map_err(|e| StorageError::InvalidPath(e.0))
}

/// Split a normalized path into its parent collection and file name.
#[must_use]
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

// ---------------------------------------------------------------------------
// LocalStorage
// ---------------------------------------------------------------------------

/// Directory-backed storage with an in-memory file index.
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
    index: DashMap<String, FileInfo>,
    next_file_id: AtomicU64,
}

impl LocalStorage {
    /// Create a storage rooted at `root`. The directory must already exist
    /// when files are written.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: DashMap::new(),
            next_file_id: AtomicU64::new(1),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn ensure_available(&self) -> Result<(), StorageError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(StorageError::Unavailable(format!(
                "{}: {e}",
                self.root.display()
            ))),
        }
    }

    async fn ensure_parent(&self, path: &str) -> Result<(), StorageError> {
        let (parent, _) = split_path(path);
        match tokio::fs::metadata(self.resolve(parent)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::MissingParent(path.to_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::MissingParent(path.to_owned()))
            }
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn write_new(target: &Path, content: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
            .await?;
        if let Err(e) = write_all(&mut file, content).await {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(target).await {
                error!(
                    path = %target.display(),
                    error = %cleanup,
                    "failed to remove partial file"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

async fn write_all(file: &mut tokio::fs::File, content: &[u8]) -> io::Result<()> {
    file.write_all(content).await?;
    file.flush().await?;
    file.sync_all().await
}

fn system_time_to_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_secs()).map_or(i64::MIN, |s| -s),
    }
}

fn secs_to_system_time(secs: i64) -> SystemTime {
    let magnitude = Duration::from_secs(secs.unsigned_abs());
    let shifted = if secs >= 0 {
        UNIX_EPOCH.checked_add(magnitude)
    } else {
        UNIX_EPOCH.checked_sub(magnitude)
    };
    shifted.unwrap_or(UNIX_EPOCH)
}

#[async_trait]
impl Storage for LocalStorage {
    async fn file_exists(&self, path: &str) -> Result<bool, StorageError> {
        self.ensure_available().await?;
        tokio::fs::try_exists(self.resolve(path))
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn new_file(&self, path: &str, content: Bytes) -> Result<u64, StorageError> {
        self.ensure_available().await?;
        self.ensure_parent(path).await?;

        let target = self.resolve(path);
        match Self::write_new(&target, &content).await {
            Ok(()) => {
                debug!(path, size = content.len(), "wrote new file");
                Ok(content.len() as u64)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(path.to_owned()))
            }
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        self.ensure_available().await?;
        self.ensure_parent(to).await?;
        tokio::fs::rename(self.resolve(from), self.resolve(to))
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StorageError::NotFound(from.to_owned()),
                _ => StorageError::io(to, e),
            })?;
        debug!(from, to, "renamed file");
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => {
                self.index.remove(path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_owned()))
            }
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn touch(&self, path: &str, mtime: i64) -> Result<(), StorageError> {
        let target = self.resolve(path);
        let when = secs_to_system_time(mtime);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::options().write(true).open(&target)?;
            file.set_modified(when)
        })
        .await
        .map_err(|e| StorageError::io(path, io::Error::other(e)))?
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_owned()),
            _ => StorageError::io(path, e),
        })
    }

    async fn update(&self, path: &str) -> Result<FileInfo, StorageError> {
        let meta = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StorageError::NotFound(path.to_owned()),
                _ => StorageError::io(path, e),
            })?;
        let mtime = meta
            .modified()
            .map(system_time_to_secs)
            .map_err(|e| StorageError::io(path, e))?;

        let etag = uuid::Uuid::new_v4().simple().to_string();
        let mut entry = self.index.entry(path.to_owned()).or_insert_with(|| FileInfo {
            file_id: self.next_file_id.fetch_add(1, Ordering::Relaxed),
            etag: String::new(),
            size: 0,
            mtime: 0,
            checksum: None,
        });
        entry.etag = etag;
        entry.size = meta.len();
        entry.mtime = mtime;
        Ok(entry.clone())
    }

    async fn set_checksum(&self, path: &str, checksum: Option<&str>) -> Result<(), StorageError> {
        let mut entry = self
            .index
            .get_mut(path)
            .ok_or_else(|| StorageError::NotFound(path.to_owned()))?;
        entry.checksum = checksum.map(str::to_owned);
        Ok(())
    }

    async fn file_info(&self, path: &str) -> Result<Option<FileInfo>, StorageError> {
        Ok(self.index.get(path).map(|entry| entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_normalize_paths() {
        assert_eq!(normalize_path("a.txt").expect("valid"), "/a.txt");
        assert_eq!(normalize_path("//docs/./b.txt").expect("valid"), "/docs/b.txt");
        assert_eq!(normalize_path("docs\\c.txt").expect("valid"), "/docs/c.txt");
    }

    #[test]
    fn test_should_reject_escaping_or_empty_paths() {
        assert!(matches!(
            normalize_path("/docs/../../etc/passwd"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(normalize_path("/"), Err(StorageError::InvalidPath(_))));
        assert!(matches!(normalize_path(""), Err(StorageError::InvalidPath(_))));
        assert!(matches!(normalize_path("a\0b"), Err(StorageError::InvalidPath(_))));
    }

    #[test]
    fn test_should_split_path() {
        assert_eq!(split_path("/a.txt"), ("/", "a.txt"));
        assert_eq!(split_path("/docs/sub/b.txt"), ("/docs/sub", "b.txt"));
    }

    #[tokio::test]
    async fn test_should_create_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());

        let written = storage
            .new_file("/a.txt", Bytes::from_static(b"hello"))
            .await
            .expect("create");
        assert_eq!(written, 5);
        assert!(storage.file_exists("/a.txt").await.expect("exists"));

        let err = storage
            .new_file("/a.txt", Bytes::from_static(b"again"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(
            std::fs::read(dir.path().join("a.txt")).expect("read"),
            b"hello"
        );
    }

    #[tokio::test]
    async fn test_should_report_missing_parent_as_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());

        let err = storage
            .new_file("/missing/a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingParent(_)));
        assert_eq!(err.code(), BundleErrorCode::Conflict);
    }

    #[tokio::test]
    async fn test_should_report_missing_root_as_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path().join("gone"));

        let err = storage.file_exists("/a.txt").await.unwrap_err();
        assert_eq!(err.code(), BundleErrorCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn test_should_keep_file_id_and_rotate_etag_on_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        storage
            .new_file("/a.txt", Bytes::from_static(b"hello"))
            .await
            .expect("create");

        let first = storage.update("/a.txt").await.expect("update");
        let second = storage.update("/a.txt").await.expect("update");
        assert_eq!(first.file_id, second.file_id);
        assert_ne!(first.etag, second.etag);
        assert_eq!(second.size, 5);

        storage
            .new_file("/b.txt", Bytes::from_static(b"x"))
            .await
            .expect("create");
        let other = storage.update("/b.txt").await.expect("update");
        assert!(other.file_id > first.file_id);
    }

    #[tokio::test]
    async fn test_should_touch_and_store_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        storage
            .new_file("/a.txt", Bytes::from_static(b"hello"))
            .await
            .expect("create");

        storage.touch("/a.txt", 784_887_151).await.expect("touch");
        let info = storage.update("/a.txt").await.expect("update");
        assert_eq!(info.mtime, 784_887_151);

        storage
            .set_checksum("/a.txt", Some("SHA1:abc"))
            .await
            .expect("checksum");
        let info = storage.file_info("/a.txt").await.expect("info").expect("indexed");
        assert_eq!(info.checksum.as_deref(), Some("SHA1:abc"));

        storage.set_checksum("/a.txt", None).await.expect("clear");
        let info = storage.file_info("/a.txt").await.expect("info").expect("indexed");
        assert_eq!(info.checksum, None);
    }

    #[tokio::test]
    async fn test_should_rename_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        storage
            .new_file("/.a.txt.part", Bytes::from_static(b"data"))
            .await
            .expect("create");

        storage.rename("/.a.txt.part", "/a.txt").await.expect("rename");
        assert!(!storage.file_exists("/.a.txt.part").await.expect("exists"));
        assert!(storage.file_exists("/a.txt").await.expect("exists"));

        storage.remove("/a.txt").await.expect("remove");
        assert!(matches!(
            storage.remove("/a.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
