//! Shared types for the RustStack bundled-upload service.
//!
//! A bundle is a single `multipart/related` request carrying many files. The
//! types in this crate travel between the HTTP layer (which demultiplexes the
//! stream and coordinates parts) and the core (which commits each part to
//! storage):
//!
//! - [`PartHeaderMap`] / [`BundlePart`]: one parsed part.
//! - [`CommitRequest`] / [`CommitResult`]: the committer's input and output.
//! - [`BundleOutcome`]: ordered per-part results of a whole request.
//! - [`BundleError`] / [`BundleErrorCode`]: the wire-facing error model.

pub mod error;
pub mod types;

pub use error::{BundleError, BundleErrorCode};
pub use types::{
    BundleMetadata, BundleOutcome, BundlePart, CommitFailure, CommitRequest, CommitResult,
    CommitSuccess, DuplicateEntry, ErrorPolicy, FileDeclaration, HeaderError, InvalidPath,
    PartHeaderMap, headers, normalize_path,
};
