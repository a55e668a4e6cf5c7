//! Metrics-collecting store decorator
//!
//! Records, per store call, latency and byte counts for hits, misses and
//! writes. All counters are lock-free atomics; [`MetricsStore::snapshot`]
//! yields a serializable view for external reporting.

use crate::CacheStore;
use kiln_core::{CacheKey, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time view of the counters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    /// Reads that found an entry
    pub hits: u64,
    /// Reads that missed cleanly
    pub misses: u64,
    /// Completed writes
    pub writes: u64,
    /// Bytes served from the store
    pub bytes_hit: u64,
    /// Bytes sent to the store
    pub bytes_written: u64,
    /// Cumulative read latency, nanoseconds
    pub read_nanos: u64,
    /// Cumulative write latency, nanoseconds
    pub write_nanos: u64,
    /// Storage faults surfaced by the backing store
    pub faults: u64,
}

/// Decorator tallying operation metrics around a backing store
pub struct MetricsStore<S> {
    backing: S,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    bytes_hit: AtomicU64,
    bytes_written: AtomicU64,
    read_nanos: AtomicU64,
    write_nanos: AtomicU64,
    faults: AtomicU64,
}

impl<S: CacheStore> MetricsStore<S> {
    /// Wrap `backing` with metrics collection.
    pub fn new(backing: S) -> Self {
        Self {
            backing,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            bytes_hit: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            read_nanos: AtomicU64::new(0),
            write_nanos: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    /// Access the backing store.
    pub fn backing(&self) -> &S {
        &self.backing
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_hit: self.bytes_hit.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            read_nanos: self.read_nanos.load(Ordering::Relaxed),
            write_nanos: self.write_nanos.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

impl<S: CacheStore> CacheStore for MetricsStore<S> {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let outcome = self.backing.read(key, file_name);
        self.read_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        match &outcome {
            Ok(Some(bytes)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.bytes_hit.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_storage_fault() => {
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        outcome
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        let start = Instant::now();
        let outcome = self.backing.write(key, file_name, bytes);
        self.write_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        match &outcome {
            Ok(_) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                self.bytes_written
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            Err(e) if e.is_storage_fault() => {
                self.faults.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        outcome
    }
}
