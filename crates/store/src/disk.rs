//! Local-disk store with per-lineage eviction
//!
//! Layout: `<base>/<namespace>/<group>/<name>/<digest>/<fileName>`. All
//! digests under the same `(namespace, group, name)` form a lineage; the
//! first write into a new digest directory trims the lineage to the
//! configured maximum, deleting oldest-modified digests first.

use crate::CacheStore;
use kiln_core::{CacheKey, Error, Result, validate_file_name};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Default maximum number of entries kept per lineage
pub const DEFAULT_MAX_ENTRIES: usize = 4;

/// File-system backed cache store
#[derive(Debug, Clone)]
pub struct DiskStore {
    base: PathBuf,
    max_entries_per_lineage: usize,
}

impl DiskStore {
    /// Create a store rooted at `base` with the default lineage bound.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            max_entries_per_lineage: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Override the per-lineage entry bound. A bound of zero is treated as 1;
    /// the entry being written always survives.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries_per_lineage = max_entries.max(1);
        self
    }

    fn lineage_dir(&self, key: &CacheKey) -> PathBuf {
        self.base
            .join(key.namespace())
            .join(key.group())
            .join(key.name())
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.lineage_dir(key).join(key.digest())
    }

    /// Delete oldest sibling digest directories until the lineage fits the
    /// bound, keeping `keep` (the digest just written). Returns the number of
    /// entries deleted.
    ///
    /// The listing is not transactional across concurrent writers to the same
    /// lineage; a racing eviction is benign and simply skipped.
    fn evict_lineage(&self, key: &CacheKey, keep: &Path) -> Result<u64> {
        let lineage = self.lineage_dir(key);
        let mut siblings: Vec<(PathBuf, SystemTime)> = Vec::new();
        let entries = fs::read_dir(&lineage).map_err(|e| Error::io(e, &lineage, "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &lineage, "read_dir_entry"))?;
            let path = entry.path();
            if !path.is_dir() || path == keep {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            siblings.push((path, modified));
        }

        // keep itself occupies one slot
        let allowed_siblings = self.max_entries_per_lineage.saturating_sub(1);
        if siblings.len() <= allowed_siblings {
            return Ok(0);
        }

        siblings.sort_by_key(|(_, modified)| *modified);
        let excess = siblings.len() - allowed_siblings;
        let mut evicted = 0u64;
        for (path, _) in siblings.into_iter().take(excess) {
            // Refuse to delete anything that somehow resolves outside the
            // configured base directory.
            if !path.starts_with(&self.base) {
                return Err(Error::configuration(format!(
                    "refusing to evict {} outside cache base {}",
                    path.display(),
                    self.base.display()
                )));
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    evicted += 1;
                    tracing::debug!(entry = %path.display(), "Evicted cache entry");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // A concurrent writer already evicted it.
                }
                Err(e) => return Err(Error::io(e, &path, "remove_dir_all")),
            }
        }
        Ok(evicted)
    }
}

impl CacheStore for DiskStore {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        validate_file_name(file_name)?;
        let path = self.entry_dir(key).join(file_name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(e, &path, "read")),
        }
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        validate_file_name(file_name)?;
        let dir = self.entry_dir(key);
        let is_new_entry = !dir.exists();
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;

        let path = dir.join(file_name);
        fs::write(&path, bytes).map_err(|e| Error::io(e, &path, "write"))?;

        if is_new_entry {
            self.evict_lineage(key, &dir)
        } else {
            Ok(0)
        }
    }
}
