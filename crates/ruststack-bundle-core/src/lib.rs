//! Core of the RustStack bundled-upload service.
//!
//! The HTTP layer demultiplexes a bundle into parts; this crate turns each
//! part into a file.
//!
//! ```text
//! BundleHandler (HTTP crate)
//!        |
//!        v
//! RustStackBundle (config + backends)
//!        |
//!        v
//! PartCommitter --- LockingProvider
//!        |
//!        v
//!     Storage (directory tree + file index)
//! ```

pub mod committer;
pub mod config;
pub mod lock;
pub mod provider;
pub mod storage;

pub use committer::{CommitMode, PartCommitter};
pub use config::BundleConfig;
pub use provider::RustStackBundle;
