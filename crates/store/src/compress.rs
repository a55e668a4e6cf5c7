//! Transparent gzip compression decorator
//!
//! Wraps a backing store, compressing payloads on write and decompressing on
//! read. Names ending in a recognized pre-compressed extension pass through
//! untouched; archive bundles arrive as `.tar.zst` and double compression
//! would only burn CPU.

use crate::CacheStore;
use kiln_core::{CacheKey, Error, Result};
use std::io::{Read, Write};

/// File-name suffixes treated as already compressed
const PRECOMPRESSED_SUFFIXES: &[&str] = &[".gz", ".tgz", ".zst"];

/// Gzip compression decorator
pub struct CompressedStore<S> {
    backing: S,
}

impl<S: CacheStore> CompressedStore<S> {
    /// Wrap `backing` with transparent gzip.
    pub fn new(backing: S) -> Self {
        Self { backing }
    }

    /// Access the backing store.
    pub fn backing(&self) -> &S {
        &self.backing
    }
}

fn is_precompressed(file_name: &str) -> bool {
    PRECOMPRESSED_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map_err(|e| Error::storage_fault(format!("gzip compression failed: {e}")))
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::storage_fault(format!("gzip decompression failed: {e}")))?;
    Ok(out)
}

impl<S: CacheStore> CacheStore for CompressedStore<S> {
    fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
        let Some(stored) = self.backing.read(key, file_name)? else {
            return Ok(None);
        };
        if is_precompressed(file_name) {
            return Ok(Some(stored));
        }
        gunzip(&stored).map(Some)
    }

    fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
        if is_precompressed(file_name) {
            return self.backing.write(key, file_name, bytes);
        }
        let compressed = gzip(bytes)?;
        self.backing.write(key, file_name, &compressed)
    }
}
