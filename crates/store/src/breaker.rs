//! Failure-isolating store decorator
//!
//! Tracks read and write storage faults independently. Below the configured
//! threshold a fault is absorbed: the read becomes a miss, the write a no-op,
//! and the counter advances. Once a counter reaches the threshold, calls of
//! that kind are skipped without touching the backing store, so a known-bad
//! remote cannot keep adding latency to every build step.
//!
//! Only storage faults are absorbed. Validation errors and protocol
//! incompatibilities propagate: those mean the caller is wrong or the wire
//! format is unsafe, not that the medium hiccuped.
//!
//! By default a tripped counter never resets for the process lifetime.
//! [`FaultIsolatingStore::with_reset_after`] opts into re-arming after a
//! configured quiet interval.

use crate::CacheStore;
use kiln_core::{CacheKey, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct FaultTrack {
    failures: AtomicU32,
    skipped: AtomicU64,
    last_failure: Mutex<Option<Instant>>,
}

impl FaultTrack {
    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self
            .last_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Instant::now());
    }

    fn maybe_reset(&self, reset_after: Option<Duration>) {
        let Some(quiet) = reset_after else { return };
        let mut last = self
            .last_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(at) = *last
            && at.elapsed() >= quiet
        {
            self.failures.store(0, Ordering::Relaxed);
            *last = None;
            tracing::info!("Re-armed cache store after quiet interval");
        }
    }
}

/// Circuit-breaking decorator around a backing store
pub struct FaultIsolatingStore<S> {
    backing: S,
    threshold: u32,
    reset_after: Option<Duration>,
    reads: FaultTrack,
    writes: FaultTrack,
}

impl<S: CacheStore> FaultIsolatingStore<S> {
    /// Wrap `backing`, disabling an operation kind after `threshold`
    /// consecutive storage faults.
    pub fn new(backing: S, threshold: u32) -> Self {
        Self {
            backing,
            threshold: threshold.max(1),
            reset_after: None,
            reads: FaultTrack::default(),
            writes: FaultTrack::default(),
        }
    }

    /// Re-arm tripped counters once `quiet` has elapsed since the last fault.
    #[must_use]
    pub fn with_reset_after(mut self, quiet: Duration) -> Self {
        self.reset_after = Some(quiet);
        self
    }

    /// Storage faults absorbed on reads so far
    pub fn read_failures(&self) -> u32 {
        self.reads.failures.load(Ordering::Relaxed)
    }

    /// Storage faults absorbed on writes so far
    pub fn write_failures(&self) -> u32 {
        self.writes.failures.load(Ordering::Relaxed)
    }

    /// Reads skipped because the store was disabled
    pub fn read_skips(&self) -> u64 {
        self.reads.skipped.load(Ordering::Relaxed)
    }

    /// Writes skipped because the store was disabled
    pub fn write_skips(&self) -> u64 {
        self.writes.skipped.load(Ordering::Relaxed)
    }

    fn disabled(&self, track: &FaultTrack) -> bool {
        track.maybe_reset(self.reset_after);
        track.failures.load(Ordering::Relaxed) >= self.threshold
    }
}

impl<S: CacheStore> CacheStore for FaultIsolatingStore<S> {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        if self.disabled(&self.reads) {
            self.reads.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        match self.backing.read(key, file_name) {
            Ok(found) => Ok(found),
            Err(e) if e.is_storage_fault() => {
                self.reads.record_failure();
                tracing::warn!(key = %key, file = file_name, error = %e, "Cache read fault absorbed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        if self.disabled(&self.writes) {
            self.writes.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(0);
        }
        match self.backing.write(key, file_name, bytes) {
            Ok(evicted) => Ok(evicted),
            Err(e) if e.is_storage_fault() => {
                self.writes.record_failure();
                tracing::warn!(key = %key, file = file_name, error = %e, "Cache write fault absorbed");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Error;
    use std::sync::atomic::AtomicUsize;

    /// Backing store that fails every call and counts attempts.
    struct FlakyStore {
        read_calls: AtomicUsize,
        write_calls: AtomicUsize,
        error: fn() -> Error,
    }

    impl FlakyStore {
        fn with_error(error: fn() -> Error) -> Self {
            Self {
                read_calls: AtomicUsize::new(0),
                write_calls: AtomicUsize::new(0),
                error,
            }
        }

        fn faulting() -> Self {
            Self::with_error(|| Error::storage_fault("connection refused"))
        }
    }

    impl CacheStore for FlakyStore {
        fn read(&self, _key: &CacheKey, _file_name: &str) -> Result<Option<Vec<u8>>> {
            self.read_calls.fetch_add(1, Ordering::Relaxed);
            Err((self.error)())
        }

        fn write(&self, _key: &CacheKey, _file_name: &str, _bytes: &[u8]) -> Result<u64> {
            self.write_calls.fetch_add(1, Ordering::Relaxed);
            Err((self.error)())
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("t", "com.acme", "lib", "abc123").unwrap()
    }

    #[test]
    fn faults_are_absorbed_as_misses_below_threshold() {
        let store = FaultIsolatingStore::new(FlakyStore::faulting(), 3);
        assert_eq!(store.read(&key(), "output.json").unwrap(), None);
        assert_eq!(store.read_failures(), 1);
        assert_eq!(store.read_skips(), 0);
    }

    #[test]
    fn reads_stop_reaching_backing_store_at_threshold() {
        let store = FaultIsolatingStore::new(FlakyStore::faulting(), 3);
        for _ in 0..3 {
            store.read(&key(), "output.json").unwrap();
        }
        assert_eq!(store.backing.read_calls.load(Ordering::Relaxed), 3);

        // Disabled now: not even attempted, skip counter grows per call.
        for _ in 0..5 {
            assert_eq!(store.read(&key(), "output.json").unwrap(), None);
        }
        assert_eq!(store.backing.read_calls.load(Ordering::Relaxed), 3);
        assert_eq!(store.read_skips(), 5);
    }

    #[test]
    fn read_and_write_counters_are_independent() {
        let store = FaultIsolatingStore::new(FlakyStore::faulting(), 2);
        store.read(&key(), "output.json").unwrap();
        store.read(&key(), "output.json").unwrap();

        // Reads tripped; writes still pass through.
        assert_eq!(store.write(&key(), "output.json", b"x").unwrap(), 0);
        assert_eq!(store.backing.write_calls.load(Ordering::Relaxed), 1);
        assert_eq!(store.write_failures(), 1);
        assert_eq!(store.write_skips(), 0);
    }

    #[test]
    fn absorbed_write_reports_zero_evictions() {
        let store = FaultIsolatingStore::new(FlakyStore::faulting(), 3);
        assert_eq!(store.write(&key(), "output.json", b"x").unwrap(), 0);
    }

    #[test]
    fn protocol_mismatch_propagates_untouched() {
        let backing = FlakyStore::with_error(|| Error::ProtocolMismatch {
            server: 1,
            minimum: 2,
        });
        let store = FaultIsolatingStore::new(backing, 3);
        let err = store.read(&key(), "output.json").unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { .. }));
        assert_eq!(store.read_failures(), 0);
    }

    #[test]
    fn counters_rearm_after_quiet_interval() {
        let store = FaultIsolatingStore::new(FlakyStore::faulting(), 1)
            .with_reset_after(Duration::from_millis(20));

        store.read(&key(), "output.json").unwrap();
        assert_eq!(store.read(&key(), "output.json").unwrap(), None);
        assert_eq!(store.read_skips(), 1);

        std::thread::sleep(Duration::from_millis(40));

        // Quiet interval elapsed: the backing store is attempted again.
        store.read(&key(), "output.json").unwrap();
        assert_eq!(store.backing.read_calls.load(Ordering::Relaxed), 2);
    }
}
