//! The boundary between the HTTP layer and the part committer.
//!
//! The coordinator never touches storage itself; every part it accepts is
//! handed to a [`BundleHandler`] as a [`CommitRequest`].

use std::future::Future;
use std::pin::Pin;

use ruststack_bundle_model::{CommitRequest, CommitResult};

/// Trait that the committing backend must implement.
///
/// # Object Safety
///
/// Futures are boxed so the trait can be used as `Arc<dyn BundleHandler>`.
pub trait BundleHandler: Send + Sync + 'static {
    /// Commit one part and report its outcome.
    ///
    /// Failures are part of the returned [`CommitResult`]; the coordinator
    /// decides whether they abort the bundle.
    fn commit_part(
        &self,
        request: CommitRequest,
    ) -> Pin<Box<dyn Future<Output = CommitResult> + Send>>;
}
