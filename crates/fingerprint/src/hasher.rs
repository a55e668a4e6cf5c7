//! Content hashing for files, directory trees and archives
//!
//! A [`HashContext`] lives for one build invocation and memoizes file hashes
//! keyed by canonical absolute path plus a sensitivity tag. A memoized hash
//! is trusted only while the file's size and modification time are unchanged;
//! anything else forces a recompute, which is the sole guard against a file
//! changing between read and hash.

use kiln_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Hex SHA-256 of empty input; returned for roots that do not exist and used
/// as the "no content" sentinel in dependency sets.
pub const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Metadata file ignored when hashing a tree, so a packed bundle and the
/// equivalent unpacked tree produce the same digest.
const IGNORED_METADATA_FILE: &str = "META-INF/MANIFEST.MF";

/// How a path's content is interpreted when hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensitivity {
    /// Raw bytes of the file
    Bytes,
    /// Archive entries hashed by `(name, content)`, timestamps ignored
    ArchiveEntries,
}

#[derive(Debug, Clone)]
struct CachedDigest {
    digest: String,
    len: u64,
    modified: Option<SystemTime>,
}

/// Per-invocation hashing context with a staleness-checked result cache
#[derive(Debug, Default)]
pub struct HashContext {
    cache: Mutex<HashMap<(PathBuf, Sensitivity), CachedDigest>>,
}

impl HashContext {
    /// Create a fresh context; one per build invocation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a single file.
    ///
    /// Files in a recognized archive format (`.tar`, `.tar.gz`, `.tgz`) are
    /// hashed by their entries so that re-archiving identical content yields
    /// the same digest; everything else is hashed as raw bytes.
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        let sensitivity = if is_archive(path) {
            Sensitivity::ArchiveEntries
        } else {
            Sensitivity::Bytes
        };
        self.hash_with(path, sensitivity)
    }

    /// Hash a directory tree rooted at `root`.
    ///
    /// The digest is the SHA-256 of the sorted, newline-joined
    /// `relativePath:fileHash` lines, with paths `/`-normalized and the
    /// well-known metadata file skipped. A missing root hashes to
    /// [`EMPTY_DIGEST`] rather than failing, so empty modules stay cacheable.
    pub fn hash_tree(&self, root: &Path) -> Result<String> {
        if !root.exists() {
            tracing::debug!(root = %root.display(), "Hashing absent root as empty");
            return Ok(EMPTY_DIGEST.to_string());
        }
        if root.is_file() {
            return self.hash_file(root);
        }

        let mut lines: Vec<String> = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .map_err(|_| {
                    Error::configuration(format!(
                        "path {} is not under root {}",
                        path.display(),
                        root.display()
                    ))
                })?
                .to_string_lossy()
                .replace('\\', "/");
            if rel == IGNORED_METADATA_FILE {
                continue;
            }
            let hash = self.hash_with(path, Sensitivity::Bytes)?;
            lines.push(format!("{rel}:{hash}"));
        }
        lines.sort();
        Ok(hex::encode(Sha256::digest(lines.join("\n").as_bytes())))
    }

    /// Per-file hashes of a tree, keyed by `/`-normalized relative path.
    ///
    /// This is what populates the output-root sections of a fingerprint
    /// input; a missing root yields an empty map.
    pub fn tree_file_hashes(
        &self,
        root: &Path,
    ) -> Result<std::collections::BTreeMap<String, String>> {
        let mut hashes = std::collections::BTreeMap::new();
        if !root.is_dir() {
            return Ok(hashes);
        }
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if rel == IGNORED_METADATA_FILE {
                continue;
            }
            let hash = self.hash_with(path, Sensitivity::Bytes)?;
            hashes.insert(rel, hash);
        }
        Ok(hashes)
    }

    fn hash_with(&self, path: &Path, sensitivity: Sensitivity) -> Result<String> {
        let canonical = path
            .canonicalize()
            .map_err(|e| Error::io(e, path, "canonicalize"))?;
        let meta = fs::metadata(&canonical).map_err(|e| Error::io(e, &canonical, "metadata"))?;
        let len = meta.len();
        let modified = meta.modified().ok();

        let cache_key = (canonical.clone(), sensitivity);
        {
            let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(cached) = cache.get(&cache_key)
                && cached.len == len
                && cached.modified == modified
            {
                return Ok(cached.digest.clone());
            }
        }

        let digest = match sensitivity {
            Sensitivity::Bytes => hash_bytes_of(&canonical)?,
            Sensitivity::ArchiveEntries => hash_archive_entries(&canonical)?,
        };

        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.insert(
            cache_key,
            CachedDigest {
                digest: digest.clone(),
                len,
                modified,
            },
        );
        Ok(digest)
    }
}

fn is_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn hash_bytes_of(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 64];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an archive by its `(entryName, contentHash)` pairs, sorted by name.
/// Embedded timestamps and ordering do not contribute.
fn hash_archive_entries(path: &Path) -> Result<String> {
    let file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let reader: Box<dyn Read> = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut archive = tar::Archive::new(reader);
    let mut lines: Vec<String> = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| Error::io(e, path, "read archive"))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::io(e, path, "read archive entry"))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_name = entry
            .path()
            .map_err(|e| Error::io(e, path, "read entry path"))?
            .to_string_lossy()
            .replace('\\', "/");
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 1024 * 64];
        loop {
            let n = entry
                .read(&mut buf)
                .map_err(|e| Error::io(e, path, "read entry"))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        lines.push(format!("{entry_name}:{}", hex::encode(hasher.finalize())));
    }
    lines.sort();
    Ok(hex::encode(Sha256::digest(lines.join("\n").as_bytes())))
}
