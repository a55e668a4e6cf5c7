//! Configuration surface consumed by the cache core
//!
//! The host orchestrator loads and merges its own configuration files; the
//! core only sees this struct, fully resolved.

use serde::{Deserialize, Serialize};

/// Which backing store to use
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum StoreBackend {
    /// Local disk store rooted at `path`
    Disk {
        /// Base directory of the store
        path: String,
    },
    /// In-process LRU bounded by entry count
    Memory {
        /// Maximum number of keys held
        capacity: usize,
    },
    /// In-process LRU bounded by total payload bytes
    MemoryBudget {
        /// Maximum total bytes held
        max_bytes: u64,
    },
    /// Remote HTTP cache service
    Http {
        /// Base URL, e.g. `https://cache.example.com/cache`
        url: String,
    },
    /// S3-compatible object storage
    S3 {
        /// Bucket name
        bucket: String,
        /// Optional key prefix within the bucket
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        /// Optional custom endpoint (MinIO, LocalStack)
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint_url: Option<String>,
        /// Optional region override
        #[serde(skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

/// One output bundle: a named set of include globs packed into a single
/// archive under the entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleConfig {
    /// Bundle alias; becomes the archive file name stem
    pub name: String,
    /// Ant-style include patterns, relative to the work's output directory
    pub includes: Vec<String>,
}

/// Resolved cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Backing store selection
    pub backend: StoreBackend,

    /// Gzip-compress payloads on the way to the store
    #[serde(default = "default_true")]
    pub compression: bool,

    /// Maximum entries kept per `(namespace, group, name)` lineage on disk
    #[serde(default = "default_max_entries")]
    pub max_entries_per_lineage: usize,

    /// Consecutive storage faults before a store is disabled
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Re-arm the failure counters after this many quiet seconds.
    /// Absent means a tripped store stays disabled for the process lifetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reset_seconds: Option<u64>,

    /// Connect timeout for remote stores, milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read/write timeout for remote stores, milliseconds
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Object-storage entry time-to-live, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,

    /// Minimum remote protocol version this client accepts; absent disables
    /// the check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_protocol_version: Option<u32>,

    /// Output bundles to pack and restore
    #[serde(default)]
    pub bundles: Vec<BundleConfig>,

    /// Scopes (as `group:name`) excluded from caching
    #[serde(default)]
    pub exclusions: Vec<String>,

    /// Skip the cache entirely; work always runs
    #[serde(default)]
    pub bypass: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    4
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_io_timeout_ms() -> u64 {
    60_000
}

impl CacheConfig {
    /// A disk-backed configuration with defaults, for tests and simple hosts.
    #[must_use]
    pub fn disk(path: impl Into<String>) -> Self {
        Self {
            backend: StoreBackend::Disk { path: path.into() },
            compression: true,
            max_entries_per_lineage: default_max_entries(),
            failure_threshold: default_failure_threshold(),
            failure_reset_seconds: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            ttl_seconds: None,
            min_protocol_version: None,
            bundles: Vec::new(),
            exclusions: Vec::new(),
            bypass: false,
        }
    }
}
