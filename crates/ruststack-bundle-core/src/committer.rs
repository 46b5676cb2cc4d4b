//! Part committer.
//!
//! Materializes one bundle part as a new file. In [`CommitMode::Staged`] the
//! content is first written to a hidden staging file next to the target and
//! then renamed into place under an exclusive lock; in [`CommitMode::Direct`]
//! it is written straight to the target under the lock.
//!
//! After the target appears the lock is downgraded to shared while the file
//! index, mtime and checksum are updated, and released when the commit ends.
//! On every failure path the staging file is removed, so a rejected part
//! leaves neither a target nor a staging artifact behind.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ruststack_bundle_model::{
    BundleErrorCode, CommitFailure, CommitRequest, CommitResult, CommitSuccess,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::lock::{LockError, LockGuard, LockType, LockingProvider};
use crate::storage::{Storage, StorageError, normalize_path, split_path};

// ---------------------------------------------------------------------------
// CommitMode
// ---------------------------------------------------------------------------

/// How part content reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Write to a staging file, then rename into place.
    #[default]
    Staged,
    /// Write directly to the target while holding an exclusive lock.
    Direct,
}

impl CommitMode {
    /// Return the configuration name of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`CommitMode`] fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown commit mode: {0}")]
pub struct ParseCommitModeError(String);

impl FromStr for CommitMode {
    type Err = ParseCommitModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staged" | "part" => Ok(Self::Staged),
            "direct" => Ok(Self::Direct),
            _ => Err(ParseCommitModeError(s.to_owned())),
        }
    }
}

/// Staging location for `target`: a hidden sibling with a unique transfer id.
#[must_use]
pub fn staging_path(target: &str) -> String {
    let (parent, name) = split_path(target);
    let transfer_id = uuid::Uuid::new_v4().simple();
    if parent == "/" {
        format!("/.{name}.ocTransferId{transfer_id}.part")
    } else {
        format!("{parent}/.{name}.ocTransferId{transfer_id}.part")
    }
}

// ---------------------------------------------------------------------------
// PartCommitter
// ---------------------------------------------------------------------------

/// Commits single parts to storage.
#[derive(Debug, Clone)]
pub struct PartCommitter {
    storage: Arc<dyn Storage>,
    locks: Arc<dyn LockingProvider>,
    mode: CommitMode,
}

impl PartCommitter {
    /// Create a committer over the given backends.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        locks: Arc<dyn LockingProvider>,
        mode: CommitMode,
    ) -> Self {
        Self {
            storage,
            locks,
            mode,
        }
    }

    /// Commit one part. Never panics and never leaves a staging file behind.
    pub async fn commit(&self, request: CommitRequest) -> CommitResult {
        let raw_path = request.path.clone();
        match self.try_commit(request).await {
            Ok(success) => {
                info!(
                    path = %raw_path,
                    file_id = success.file_id,
                    size = success.size,
                    "committed bundle part"
                );
                CommitResult::Success(success)
            }
            Err(failure) => {
                warn!(
                    path = %raw_path,
                    code = %failure.code,
                    message = %failure.message,
                    "bundle part rejected"
                );
                CommitResult::Failure(failure)
            }
        }
    }

    async fn try_commit(&self, request: CommitRequest) -> Result<CommitSuccess, CommitFailure> {
        let path = normalize_path(&request.path).map_err(storage_failure)?;

        if request.content.len() as u64 != request.declared_length {
            return Err(CommitFailure::new(
                BundleErrorCode::BadRequest,
                format!(
                    "expected filesize of {} bytes but read {} bytes from the stream",
                    request.declared_length,
                    request.content.len()
                ),
            ));
        }

        if self.storage.file_exists(&path).await.map_err(storage_failure)? {
            return Err(already_exists(&path));
        }

        let mut guard = match self.mode {
            CommitMode::Staged => self.stage_and_rename(&path, &request).await?,
            CommitMode::Direct => self.write_direct(&path, &request).await?,
        };

        if let Err(e) = guard.change(LockType::Shared) {
            // The exclusive lock stays held and is released by the guard.
            debug!(path = %path, error = %e, "could not downgrade lock");
        }

        self.finalize(&path, &request).await
    }

    /// Staged protocol: write staging, lock, re-check, rename, verify.
    async fn stage_and_rename(
        &self,
        path: &str,
        request: &CommitRequest,
    ) -> Result<LockGuard, CommitFailure> {
        let staging = staging_path(path);
        self.storage
            .new_file(&staging, request.content.clone())
            .await
            .map_err(|e| match e {
                StorageError::MissingParent(_) => {
                    storage_failure(StorageError::MissingParent(path.to_owned()))
                }
                other => storage_failure(other),
            })?;
        debug!(path, staging = %staging, "staged part content");

        let guard = match LockGuard::acquire(Arc::clone(&self.locks), path, LockType::Exclusive) {
            Ok(guard) => guard,
            Err(e) => {
                self.discard(&staging).await;
                return Err(lock_failure(&e));
            }
        };

        match self.storage.file_exists(path).await {
            Ok(false) => {}
            Ok(true) => {
                self.discard(&staging).await;
                return Err(already_exists(path));
            }
            Err(e) => {
                self.discard(&staging).await;
                return Err(storage_failure(e));
            }
        }

        if let Err(e) = self.storage.rename(&staging, path).await {
            self.discard(&staging).await;
            return Err(storage_failure(e));
        }

        match self.storage.file_exists(path).await {
            Ok(true) => Ok(guard),
            Ok(false) => {
                self.discard(&staging).await;
                Err(CommitFailure::new(
                    BundleErrorCode::InternalError,
                    format!("could not rename part file to {path}"),
                ))
            }
            Err(e) => {
                self.discard(&staging).await;
                Err(storage_failure(e))
            }
        }
    }

    /// Direct protocol: lock, then create the target in place.
    async fn write_direct(
        &self,
        path: &str,
        request: &CommitRequest,
    ) -> Result<LockGuard, CommitFailure> {
        let guard = LockGuard::acquire(Arc::clone(&self.locks), path, LockType::Exclusive)
            .map_err(|e| lock_failure(&e))?;
        self.storage
            .new_file(path, request.content.clone())
            .await
            .map_err(storage_failure)?;
        Ok(guard)
    }

    async fn finalize(
        &self,
        path: &str,
        request: &CommitRequest,
    ) -> Result<CommitSuccess, CommitFailure> {
        let mtime_accepted = match request.mtime {
            Some(mtime) => match self.storage.touch(path, mtime).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(path, mtime, error = %e, "could not apply mtime");
                    false
                }
            },
            None => false,
        };

        let info = self.storage.update(path).await.map_err(storage_failure)?;
        self.storage
            .set_checksum(path, request.checksum.as_deref())
            .await
            .map_err(storage_failure)?;

        Ok(CommitSuccess {
            etag: info.etag,
            file_id: info.file_id,
            size: info.size,
            mtime: info.mtime,
            mtime_accepted,
        })
    }

    async fn discard(&self, staging: &str) {
        match self.storage.remove(staging).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => error!(path = staging, error = %e, "failed to remove staging file"),
        }
    }
}

fn storage_failure(err: StorageError) -> CommitFailure {
    CommitFailure::new(err.code(), err.to_string())
}

fn lock_failure(err: &LockError) -> CommitFailure {
    CommitFailure::new(BundleErrorCode::Locked, err.to_string())
}

fn already_exists(path: &str) -> CommitFailure {
    CommitFailure::new(
        BundleErrorCode::Forbidden,
        format!("{path} already exists; bundled uploads only create new files"),
    )
}
