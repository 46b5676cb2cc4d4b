//! Bundle service configuration.
//!
//! Provides [`BundleConfig`], loaded from environment variables by
//! [`BundleConfig::from_env`].

use ruststack_bundle_model::ErrorPolicy;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::committer::CommitMode;

/// Default upper bound for a single part: 256 MiB.
pub const DEFAULT_MAX_PART_SIZE: u64 = 268_435_456;

/// Bundle service configuration.
///
/// # Examples
///
/// ```
/// use ruststack_bundle_core::config::BundleConfig;
///
/// let config = BundleConfig::default();
/// assert_eq!(config.gateway_listen, "0.0.0.0:8080");
/// assert_eq!(config.bundle_path, "/files/bundle");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct BundleConfig {
    /// Bind address for the server (e.g. `"0.0.0.0:8080"`).
    #[builder(default = String::from("0.0.0.0:8080"))]
    pub gateway_listen: String,

    /// Root directory committed files are written under.
    #[builder(default = String::from("/var/lib/ruststack-bundle"))]
    pub data_dir: String,

    /// Request path of the bundle endpoint.
    #[builder(default = String::from("/files/bundle"))]
    pub bundle_path: String,

    /// Reaction to a failed part, which also fixes the response shape.
    #[builder(default)]
    pub error_policy: ErrorPolicy,

    /// How part content reaches its target.
    #[builder(default)]
    pub commit_mode: CommitMode,

    /// Largest accepted part, in bytes.
    #[builder(default = DEFAULT_MAX_PART_SIZE)]
    pub max_part_size: u64,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            gateway_listen: String::from("0.0.0.0:8080"),
            data_dir: String::from("/var/lib/ruststack-bundle"),
            bundle_path: String::from("/files/bundle"),
            error_policy: ErrorPolicy::default(),
            commit_mode: CommitMode::default(),
            max_part_size: DEFAULT_MAX_PART_SIZE,
            log_level: String::from("info"),
        }
    }
}

impl BundleConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GATEWAY_LISTEN` | `0.0.0.0:8080` |
    /// | `DATA_DIR` | `/var/lib/ruststack-bundle` |
    /// | `BUNDLE_PATH` | `/files/bundle` |
    /// | `BUNDLE_ERROR_POLICY` | `isolate` |
    /// | `BUNDLE_COMMIT_MODE` | `staged` |
    /// | `BUNDLE_MAX_PART_SIZE` | `268435456` |
    /// | `LOG_LEVEL` | `info` |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("GATEWAY_LISTEN") {
            config.gateway_listen = v;
        }
        if let Some(v) = lookup("DATA_DIR") {
            config.data_dir = v;
        }
        if let Some(v) = lookup("BUNDLE_PATH") {
            config.bundle_path = v;
        }
        if let Some(policy) = lookup("BUNDLE_ERROR_POLICY").and_then(|v| v.parse().ok()) {
            config.error_policy = policy;
        }
        if let Some(mode) = lookup("BUNDLE_COMMIT_MODE").and_then(|v| v.parse().ok()) {
            config.commit_mode = mode;
        }
        if let Some(n) = lookup("BUNDLE_MAX_PART_SIZE").and_then(|v| v.parse::<u64>().ok()) {
            config.max_part_size = n;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }
}
