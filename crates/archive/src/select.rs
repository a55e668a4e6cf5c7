//! Glob-based file selection
//!
//! Ant-style include patterns over `/`-normalized relative paths: `?` matches
//! one character, `*` spans within a single path segment, `**` spans whole
//! segments (including zero, so `**/Test.java` matches at depth zero).
//! Backslash separators are folded to `/` before matching.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use kiln_core::{Error, Result};
use std::path::{Path, PathBuf};

/// A compiled set of include patterns
#[derive(Debug, Clone)]
pub struct IncludeSet {
    set: GlobSet,
}

impl IncludeSet {
    /// Compile `patterns`; fails fast on an invalid pattern.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().replace('\\', "/");
            let glob = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    Error::configuration(format!("invalid include pattern '{pattern}': {e}"))
                })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::configuration(format!("failed to build include set: {e}")))?;
        Ok(Self { set })
    }

    /// Whether a relative path matches at least one include pattern.
    #[must_use]
    pub fn matches(&self, rel_path: &str) -> bool {
        let normalized = rel_path.replace('\\', "/");
        self.set.is_match(Path::new(&normalized))
    }

    /// Walk `root` and collect every regular file whose relative path
    /// matches, sorted so the result is independent of walk order.
    pub fn select(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut selected = Vec::new();
        if !root.is_dir() {
            return Ok(selected);
        }
        for entry in walkdir::WalkDir::new(root).into_iter() {
            let entry = entry.map_err(|e| {
                Error::storage_fault(format!("walking {} failed: {e}", root.display()))
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            if self.matches(&rel.to_string_lossy()) {
                selected.push(rel.to_path_buf());
            }
        }
        selected.sort();
        Ok(selected)
    }
}
