//! Cache store implementations for kiln
//!
//! Everything here speaks one contract, [`CacheStore`]: `read` answers with
//! the stored bytes or a clean miss, `write` publishes bytes and reports how
//! many older entries it evicted. A failing medium raises a *storage fault*,
//! which is distinct from a miss: callers treat misses as normal, while
//! faults are logged and fed to the failure-isolating decorator.
//!
//! Backends: [`DiskStore`], [`MemoryStore`], [`BudgetedMemoryStore`],
//! [`HttpStore`], [`S3Store`]. Decorators: [`CompressedStore`],
//! [`FaultIsolatingStore`], [`MetricsStore`].

mod breaker;
mod compress;
mod disk;
mod http;
mod memory;
mod metrics;
mod s3;

pub use breaker::FaultIsolatingStore;
pub use compress::CompressedStore;
pub use disk::DiskStore;
pub use http::{HttpStore, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER};
pub use memory::{BudgetedMemoryStore, MemoryStore};
pub use metrics::{MetricsStore, StoreStats};
pub use s3::{S3Store, S3StoreConfig};

use kiln_core::{CacheKey, Result};

/// Common contract of every cache store.
///
/// Implementations must be safe under concurrent calls from multiple
/// executions in the same process. Entries are opaque byte blobs keyed by
/// `(key, fileName)`; there are no partial updates and no cross-key
/// consistency.
pub trait CacheStore: Send + Sync {
    /// Read a blob. `Ok(None)` is a clean miss; an `Err` that satisfies
    /// [`kiln_core::Error::is_storage_fault`] is a transient medium failure.
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>>;

    /// Publish a blob. Returns the number of older entries evicted as a side
    /// effect of this write (never the entry just written).
    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64>;
}

impl<S: CacheStore + ?Sized> CacheStore for std::sync::Arc<S> {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        (**self).read(key, file_name)
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        (**self).write(key, file_name, bytes)
    }
}

impl<S: CacheStore + ?Sized> CacheStore for Box<S> {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        (**self).read(key, file_name)
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        (**self).write(key, file_name, bytes)
    }
}
