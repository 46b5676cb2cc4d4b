//! Part, commit, and outcome types exchanged between the bundle layers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BundleErrorCode;

/// Well-known per-part header names (always lower-case).
pub mod headers {
    /// Target path of the part.
    pub const X_FILE_PATH: &str = "x-file-path";
    /// Declared content length of the part.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Content type of the part.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Identifier linking a part to a metadata declaration.
    pub const CONTENT_ID: &str = "content-id";
    /// Modification time to apply, in seconds since the epoch.
    pub const OC_MTIME: &str = "oc-mtime";
    /// Checksum to store alongside the file (e.g. `SHA1:abc...`).
    pub const OC_CHECKSUM: &str = "oc-checksum";
    /// Explicit length override for the part.
    pub const OC_TOTAL_LENGTH: &str = "oc-total-length";
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// A target path that cannot name a file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path: {0:?}")]
pub struct InvalidPath(pub String);

/// Normalize a client-supplied target path.
///
/// The result is absolute and `/`-separated. Backslashes count as
/// separators; empty and `.` segments are dropped, so `/a.txt`, `a.txt`,
/// `//a.txt` and `/./a.txt` all name `/a.txt`.
///
/// # Errors
///
/// Returns [`InvalidPath`] if the path is empty, contains a NUL byte, or has
/// a `..` segment.
pub fn normalize_path(raw: &str) -> Result<String, InvalidPath> {
    if raw.contains('\0') {
        return Err(InvalidPath(raw.to_owned()));
    }

    let mut normalized = String::with_capacity(raw.len() + 1);
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(InvalidPath(raw.to_owned())),
            _ => {
                normalized.push('/');
                normalized.push_str(segment);
            }
        }
    }

    if normalized.is_empty() {
        return Err(InvalidPath(raw.to_owned()));
    }
    Ok(normalized)
}

// ---------------------------------------------------------------------------
// PartHeaderMap
// ---------------------------------------------------------------------------

/// Errors raised while building or reading a [`PartHeaderMap`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// The same header name appeared twice in one part.
    #[error("duplicate part header: {0}")]
    Duplicate(String),

    /// A header value could not be interpreted.
    #[error("invalid value for part header {name}: {value:?}")]
    InvalidValue {
        /// The header name.
        name: String,
        /// The offending value.
        value: String,
    },
}

/// Headers of one multipart part, keyed by lower-cased name.
///
/// Values are stored trimmed. A repeated name is rejected rather than
/// silently overwritten, so an ambiguous `content-length` can never slip
/// through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaderMap {
    inner: HashMap<String, String>,
}

impl PartHeaderMap {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, normalizing the name and trimming both sides.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::Duplicate`] if the name is already present.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        let key = name.trim().to_ascii_lowercase();
        if self.inner.contains_key(&key) {
            return Err(HeaderError::Duplicate(key));
        }
        self.inner.insert(key, value.trim().to_owned());
        Ok(())
    }

    /// Look up a header value by (case-insensitive) name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Parse a header as an unsigned integer, if present.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InvalidValue`] if the value is not a non-negative integer.
    pub fn get_u64(&self, name: &str) -> Result<Option<u64>, HeaderError> {
        self.get(name)
            .map(|value| {
                value.parse::<u64>().map_err(|_| HeaderError::InvalidValue {
                    name: name.to_ascii_lowercase(),
                    value: value.to_owned(),
                })
            })
            .transpose()
    }

    /// The part's own `content-length`, if declared.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InvalidValue`] if the header is not an integer.
    pub fn content_length(&self) -> Result<Option<u64>, HeaderError> {
        self.get_u64(headers::CONTENT_LENGTH)
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map holds no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over `(name, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One parsed part: its headers plus exactly the declared number of bytes.
#[derive(Debug, Clone)]
pub struct BundlePart {
    /// The part headers.
    pub headers: PartHeaderMap,
    /// The materialized part content.
    pub content: Bytes,
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Everything the committer needs to materialize one part.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Normalized target path inside the storage root.
    pub path: String,
    /// The file content.
    pub content: Bytes,
    /// The length the client declared for this part.
    pub declared_length: u64,
    /// Modification time to apply, in seconds since the epoch.
    pub mtime: Option<i64>,
    /// Checksum to store; `None` clears any stored checksum.
    pub checksum: Option<String>,
}

/// Properties of a committed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSuccess {
    /// Version identifier of the stored file (unquoted).
    pub etag: String,
    /// Stable identifier of the stored file.
    pub file_id: u64,
    /// Stored size in bytes.
    pub size: u64,
    /// Modification time of the stored file, in seconds since the epoch.
    pub mtime: i64,
    /// Whether a client supplied mtime was applied.
    pub mtime_accepted: bool,
}

/// Why a part could not be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    /// The error kind.
    pub code: BundleErrorCode,
    /// A human-readable message.
    pub message: String,
}

impl CommitFailure {
    /// Create a failure with the given code and message.
    #[must_use]
    pub fn new(code: BundleErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Outcome of committing one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// The file was created.
    Success(CommitSuccess),
    /// The part was rejected or the commit failed.
    Failure(CommitFailure),
}

impl CommitResult {
    /// Shorthand for a failed result.
    #[must_use]
    pub fn failure(code: BundleErrorCode, message: impl Into<String>) -> Self {
        Self::Failure(CommitFailure::new(code, message))
    }

    /// Whether the commit succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

// ---------------------------------------------------------------------------
// BundleOutcome
// ---------------------------------------------------------------------------

/// Error returned when the same key is recorded twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate bundle entry: {0}")]
pub struct DuplicateEntry(pub String);

/// Per-part results of one bundle request, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct BundleOutcome {
    entries: Vec<(String, CommitResult)>,
}

impl BundleOutcome {
    /// Create an empty outcome.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateEntry`] if `key` was already recorded.
    pub fn record(
        &mut self,
        key: impl Into<String>,
        result: CommitResult,
    ) -> Result<(), DuplicateEntry> {
        let key = key.into();
        if self.contains(&key) {
            return Err(DuplicateEntry(key));
        }
        self.entries.push((key, result));
        Ok(())
    }

    /// Whether a result has been recorded for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// The result recorded for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CommitResult> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    /// All entries in arrival order.
    #[must_use]
    pub fn entries(&self) -> &[(String, CommitResult)] {
        &self.entries
    }

    /// Number of recorded parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no part has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of failed parts.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.entries.iter().filter(|(_, r)| !r.is_success()).count()
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// One file announced by the bundle metadata part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDeclaration {
    /// Identifier matched against a part's `content-id`.
    pub id: String,
    /// Target path of the file.
    pub path: String,
    /// Modification time to apply, in seconds since the epoch.
    pub mtime: Option<i64>,
    /// Declared content length.
    pub total_length: Option<u64>,
    /// Checksum to store alongside the file.
    pub checksum: Option<String>,
}

/// File declarations from a bundle's metadata part, keyed by content id.
#[derive(Debug, Clone, Default)]
pub struct BundleMetadata {
    declarations: HashMap<String, FileDeclaration>,
}

impl BundleMetadata {
    /// Create an empty metadata set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateEntry`] if the id was already declared.
    pub fn declare(&mut self, declaration: FileDeclaration) -> Result<(), DuplicateEntry> {
        if self.declarations.contains_key(&declaration.id) {
            return Err(DuplicateEntry(declaration.id));
        }
        self.declarations
            .insert(declaration.id.clone(), declaration);
        Ok(())
    }

    /// Look up the declaration for a content id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&FileDeclaration> {
        self.declarations.get(id)
    }

    /// Number of declared files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Whether nothing was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ErrorPolicy
// ---------------------------------------------------------------------------

/// How the coordinator reacts to a part that fails to commit.
///
/// The policy also fixes the response shape, so one deployment never mixes
/// both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Record the failure, keep going, answer `207 Multi-Status`.
    #[default]
    Isolate,
    /// Stop at the first failure; answer `200` with `path -> size` on success.
    Abort,
}

impl ErrorPolicy {
    /// Return the configuration name of the policy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolate => "isolate",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an [`ErrorPolicy`] fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown error policy: {0}")]
pub struct ParseErrorPolicyError(String);

impl FromStr for ErrorPolicy {
    type Err = ParseErrorPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" | "multistatus" => Ok(Self::Isolate),
            "abort" => Ok(Self::Abort),
            _ => Err(ParseErrorPolicyError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_normalize_equivalent_paths_to_one_target() {
        for raw in ["/a.txt", "a.txt", "//a.txt", "/./a.txt", "\\a.txt"] {
            assert_eq!(normalize_path(raw).expect("valid"), "/a.txt", "{raw}");
        }
        assert_eq!(normalize_path("/dir//b.txt/").expect("valid"), "/dir/b.txt");
    }

    #[test]
    fn test_should_reject_unusable_paths() {
        for raw in ["", "/", "/./", "/a/../b", "/a\0b"] {
            assert_eq!(normalize_path(raw), Err(InvalidPath(raw.to_owned())), "{raw:?}");
        }
    }

    #[test]
    fn test_should_normalize_header_names_and_values() {
        let mut map = PartHeaderMap::new();
        map.insert(" X-File-Path ", "  /a.txt ").expect("insert");
        assert_eq!(map.get("x-file-path"), Some("/a.txt"));
        assert_eq!(map.get("X-FILE-PATH"), Some("/a.txt"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_should_reject_duplicate_header() {
        let mut map = PartHeaderMap::new();
        map.insert("Content-Length", "5").expect("insert");
        let err = map.insert("content-length", "6").unwrap_err();
        assert_eq!(err, HeaderError::Duplicate("content-length".to_owned()));
        assert_eq!(map.content_length(), Ok(Some(5)));
    }

    #[test]
    fn test_should_return_none_for_missing_header() {
        let map = PartHeaderMap::new();
        assert_eq!(map.get(headers::X_FILE_PATH), None);
        assert_eq!(map.content_length(), Ok(None));
    }

    #[test]
    fn test_should_reject_non_numeric_length() {
        let mut map = PartHeaderMap::new();
        map.insert("content-length", "-3").expect("insert");
        assert!(matches!(
            map.content_length(),
            Err(HeaderError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_should_keep_outcome_order_and_reject_duplicates() {
        let mut outcome = BundleOutcome::new();
        outcome
            .record("/b", CommitResult::failure(BundleErrorCode::Locked, "locked"))
            .expect("record");
        outcome
            .record(
                "/a",
                CommitResult::Success(CommitSuccess {
                    etag: "e".to_owned(),
                    file_id: 1,
                    size: 3,
                    mtime: 0,
                    mtime_accepted: false,
                }),
            )
            .expect("record");

        let keys: Vec<&str> = outcome.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["/b", "/a"]);
        assert_eq!(outcome.failure_count(), 1);
        assert!(outcome
            .record("/a", CommitResult::failure(BundleErrorCode::BadRequest, "dup"))
            .is_err());
    }

    #[test]
    fn test_should_parse_error_policy() {
        assert_eq!("isolate".parse::<ErrorPolicy>().ok(), Some(ErrorPolicy::Isolate));
        assert_eq!("ABORT".parse::<ErrorPolicy>().ok(), Some(ErrorPolicy::Abort));
        assert!("sometimes".parse::<ErrorPolicy>().is_err());
        assert_eq!(
            serde_json::to_string(&ErrorPolicy::Abort).expect("serialize"),
            "\"abort\""
        );
    }
}
