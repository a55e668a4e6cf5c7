//! In-process memory stores
//!
//! Both variants keep a nested `fileName -> bytes` map per cache key and
//! reorder keys to most-recently-used on every read and write. A single
//! mutex guards the whole structure so the LRU bookkeeping stays consistent
//! under concurrent callers.
//!
//! [`MemoryStore`] bounds the number of keys; [`BudgetedMemoryStore`] bounds
//! the total payload bytes and replaces the reclaimable-reference variant:
//! instead of leaving reclamation to a memory manager's discretion, it
//! evicts oldest entries explicitly until it is back under budget.

use crate::CacheStore;
use kiln_core::{CacheKey, Result, validate_file_name};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct LruInner {
    entries: HashMap<CacheKey, HashMap<String, Vec<u8>>>,
    /// Front = least recently used, back = most recently used
    order: VecDeque<CacheKey>,
    total_bytes: u64,
}

impl LruInner {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.clone());
    }

    fn evict_lru(&mut self) -> u64 {
        let Some(victim) = self.order.pop_front() else {
            return 0;
        };
        let Some(files) = self.entries.remove(&victim) else {
            return 0;
        };
        let bytes: u64 = files.values().map(|b| b.len() as u64).sum();
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
        tracing::debug!(key = %victim, files = files.len(), "Evicted memory cache entry");
        files.len() as u64
    }
}

/// Entry-count bounded LRU store
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<LruInner>,
    capacity: usize,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of keys currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether the store holds no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        validate_file_name(file_name)?;
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(files) = inner.entries.get(key) else {
            return Ok(None);
        };
        let found = files.get(file_name).cloned();
        if found.is_some() {
            inner.touch(key);
        }
        Ok(found)
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        validate_file_name(file_name)?;
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let previous_len = inner
            .entries
            .entry(key.clone())
            .or_default()
            .insert(file_name.to_string(), bytes.to_vec())
            .map(|old| old.len() as u64);
        inner.total_bytes += bytes.len() as u64;
        if let Some(old_len) = previous_len {
            inner.total_bytes = inner.total_bytes.saturating_sub(old_len);
        }
        inner.touch(key);

        let mut evicted = 0u64;
        while inner.entries.len() > self.capacity {
            evicted += inner.evict_lru();
        }
        Ok(evicted)
    }
}

/// Byte-budgeted LRU store
#[derive(Debug)]
pub struct BudgetedMemoryStore {
    inner: Mutex<LruInner>,
    max_bytes: u64,
}

impl BudgetedMemoryStore {
    /// Create a store holding at most `max_bytes` of payload.
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(LruInner::default()),
            max_bytes,
        }
    }

    /// Total payload bytes currently held
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .total_bytes
    }
}

impl CacheStore for BudgetedMemoryStore {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        validate_file_name(file_name)?;
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(files) = inner.entries.get(key) else {
            return Ok(None);
        };
        let found = files.get(file_name).cloned();
        if found.is_some() {
            inner.touch(key);
        }
        Ok(found)
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        validate_file_name(file_name)?;
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let previous_len = inner
            .entries
            .entry(key.clone())
            .or_default()
            .insert(file_name.to_string(), bytes.to_vec())
            .map(|old| old.len() as u64);
        inner.total_bytes += bytes.len() as u64;
        if let Some(old_len) = previous_len {
            inner.total_bytes = inner.total_bytes.saturating_sub(old_len);
        }
        inner.touch(key);

        // Evict oldest entries until under budget; the key just written is at
        // the back of the order and survives even if it alone exceeds the
        // budget.
        let mut evicted = 0u64;
        while inner.total_bytes > self.max_bytes && inner.order.len() > 1 {
            evicted += inner.evict_lru();
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(digest: &str) -> CacheKey {
        CacheKey::new("mem", "com.acme", "lib", digest).unwrap()
    }

    #[test]
    fn read_after_write_round_trips() {
        let store = MemoryStore::new(4);
        let k = key("d1");
        store.write(&k, "blob.bin", b"payload").unwrap();
        assert_eq!(store.read(&k, "blob.bin").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn capacity_overflow_evicts_least_recently_used() {
        let store = MemoryStore::new(2);
        store.write(&key("d1"), "a.bin", b"1").unwrap();
        store.write(&key("d2"), "a.bin", b"2").unwrap();

        // Touch d1 so d2 becomes LRU.
        store.read(&key("d1"), "a.bin").unwrap();

        let evicted = store.write(&key("d3"), "a.bin", b"3").unwrap();
        assert_eq!(evicted, 1);
        assert!(store.read(&key("d2"), "a.bin").unwrap().is_none());
        assert!(store.read(&key("d1"), "a.bin").unwrap().is_some());
    }

    #[test]
    fn eviction_count_is_files_held_by_victim() {
        let store = MemoryStore::new(1);
        store.write(&key("d1"), "a.bin", b"1").unwrap();
        store.write(&key("d1"), "b.bin", b"2").unwrap();
        store.write(&key("d1"), "c.bin", b"3").unwrap();

        let evicted = store.write(&key("d2"), "a.bin", b"x").unwrap();
        assert_eq!(evicted, 3);
    }

    #[test]
    fn budget_evicts_oldest_until_under_limit() {
        let store = BudgetedMemoryStore::new(10);
        store.write(&key("d1"), "a.bin", &[0u8; 4]).unwrap();
        store.write(&key("d2"), "a.bin", &[0u8; 4]).unwrap();

        let evicted = store.write(&key("d3"), "a.bin", &[0u8; 4]).unwrap();
        assert_eq!(evicted, 1);
        assert!(store.read(&key("d1"), "a.bin").unwrap().is_none());
        assert!(store.total_bytes() <= 10);
    }

    #[test]
    fn oversized_entry_survives_alone() {
        let store = BudgetedMemoryStore::new(4);
        store.write(&key("d1"), "a.bin", &[0u8; 2]).unwrap();
        store.write(&key("d2"), "big.bin", &[0u8; 100]).unwrap();
        assert!(store.read(&key("d2"), "big.bin").unwrap().is_some());
        assert!(store.read(&key("d1"), "a.bin").unwrap().is_none());
    }

    #[test]
    fn overwriting_a_file_adjusts_accounting() {
        let store = BudgetedMemoryStore::new(100);
        store.write(&key("d1"), "a.bin", &[0u8; 40]).unwrap();
        store.write(&key("d1"), "a.bin", &[0u8; 10]).unwrap();
        assert_eq!(store.total_bytes(), 10);
    }

    #[test]
    fn concurrent_access_keeps_bookkeeping_consistent() {
        use std::sync::Arc;
        let store = Arc::new(MemoryStore::new(8));
        let mut handles = Vec::new();
        for t in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let k = key(&format!("d{}", (t * 50 + i) % 16));
                    store.write(&k, "a.bin", b"x").unwrap();
                    store.read(&k, "a.bin").unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(store.len() <= 8);
    }
}
