//! The bundle provider: configuration plus a ready-to-use part committer.

use std::sync::Arc;

use ruststack_bundle_model::{CommitRequest, CommitResult};

use crate::committer::PartCommitter;
use crate::config::BundleConfig;
use crate::lock::{LockingProvider, MemoryLockingProvider};
use crate::storage::{LocalStorage, Storage};

/// Owns the storage and locking backends of the bundle service.
///
/// All fields are `Arc`-wrapped so the provider clones cheaply into
/// per-connection service instances.
///
/// # Examples
///
/// ```
/// use ruststack_bundle_core::RustStackBundle;
/// use ruststack_bundle_core::config::BundleConfig;
///
/// let provider = RustStackBundle::new(BundleConfig::default());
/// assert_eq!(provider.config().bundle_path, "/files/bundle");
/// ```
#[derive(Debug, Clone)]
pub struct RustStackBundle {
    committer: Arc<PartCommitter>,
    storage: Arc<dyn Storage>,
    config: Arc<BundleConfig>,
}

impl RustStackBundle {
    /// Create a provider storing files under `config.data_dir` with in-process locks.
    #[must_use]
    pub fn new(config: BundleConfig) -> Self {
        let storage = Arc::new(LocalStorage::new(&config.data_dir));
        Self::with_backends(config, storage, Arc::new(MemoryLockingProvider::new()))
    }

    /// Create a provider over explicit backends.
    #[must_use]
    pub fn with_backends(
        config: BundleConfig,
        storage: Arc<dyn Storage>,
        locks: Arc<dyn LockingProvider>,
    ) -> Self {
        let committer = PartCommitter::new(Arc::clone(&storage), locks, config.commit_mode);
        Self {
            committer: Arc::new(committer),
            storage,
            config: Arc::new(config),
        }
    }

    /// Commit one part.
    pub async fn handle_commit(&self, request: CommitRequest) -> CommitResult {
        self.committer.commit(request).await
    }

    /// Returns a reference to the storage backend.
    #[must_use]
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Returns a reference to the provider configuration.
    #[must_use]
    pub fn config(&self) -> &BundleConfig {
        &self.config
    }
}
