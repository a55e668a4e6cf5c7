//! Safe bundle packing and unpacking
//!
//! Bundles are zstd-compressed tar containers holding a selected set of
//! files by relative path. Packing sorts its input so the container is
//! independent of directory walk order; unpacking validates every entry
//! path and rejects the whole archive if any entry would land outside the
//! target directory.

use kiln_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Per-bundle metadata produced by [`pack`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    /// Number of files packed
    pub file_count: u64,
    /// Total size of the packed files before compression
    pub uncompressed_size: u64,
    /// Size of the finished container on disk
    pub compressed_size: u64,
}

/// Pack `files` (relative to `root`) into a tar.zst container at `dest`.
pub fn pack(root: &Path, files: &[PathBuf], dest: &Path) -> Result<ArchiveSummary> {
    let file = fs::File::create(dest).map_err(|e| Error::io(e, dest, "create"))?;
    let encoder = zstd::Encoder::new(file, 3)
        .map_err(|e| Error::archive(format!("zstd encoder error: {e}")))?;
    let mut builder = tar::Builder::new(encoder);

    let mut sorted: Vec<&PathBuf> = files.iter().collect();
    sorted.sort();

    let mut file_count = 0u64;
    let mut uncompressed_size = 0u64;
    for rel in sorted {
        let src = root.join(rel);
        let meta = fs::metadata(&src).map_err(|e| Error::io(e, &src, "metadata"))?;
        builder
            .append_path_with_name(&src, rel)
            .map_err(|e| Error::archive(format!("tar append of {} failed: {e}", rel.display())))?;
        file_count += 1;
        uncompressed_size += meta.len();
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::archive(format!("tar finalize failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::archive(format!("zstd finish failed: {e}")))?;

    let compressed_size = fs::metadata(dest)
        .map_err(|e| Error::io(e, dest, "metadata"))?
        .len();
    tracing::debug!(
        dest = %dest.display(),
        files = file_count,
        uncompressed = uncompressed_size,
        compressed = compressed_size,
        "Packed bundle"
    );
    Ok(ArchiveSummary {
        file_count,
        uncompressed_size,
        compressed_size,
    })
}

/// Resolve an entry path under `target`, rejecting anything that would
/// escape it: absolute paths, `..` segments, drive prefixes.
fn entry_destination(target: &Path, entry_path: &Path) -> Result<PathBuf> {
    let mut dest = target.to_path_buf();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::archive(format!(
                    "entry '{}' escapes the extraction directory",
                    entry_path.display()
                )));
            }
        }
    }
    Ok(dest)
}

fn open_archive(archive: &Path) -> Result<tar::Archive<zstd::Decoder<'static, std::io::BufReader<fs::File>>>> {
    let file = fs::File::open(archive).map_err(|e| Error::io(e, archive, "open"))?;
    let decoder = zstd::Decoder::new(file)
        .map_err(|e| Error::archive(format!("zstd decoder error: {e}")))?;
    Ok(tar::Archive::new(decoder))
}

/// Unpack a container produced by [`pack`] into `target`.
///
/// Runs a validation pass over every entry name before any file is written,
/// so a crafted entry cannot leave a half-extracted tree behind. Existing
/// files at entry paths are overwritten. Returns the number of files
/// written.
pub fn unpack(archive: &Path, target: &Path) -> Result<u64> {
    // Pass 1: validate every entry path.
    let mut validation = open_archive(archive)?;
    let entries = validation
        .entries()
        .map_err(|e| Error::archive(format!("reading {} failed: {e}", archive.display())))?;
    for entry in entries {
        let entry = entry
            .map_err(|e| Error::archive(format!("reading {} failed: {e}", archive.display())))?;
        let path = entry
            .path()
            .map_err(|e| Error::archive(format!("entry path unreadable: {e}")))?;
        entry_destination(target, &path)?;
    }

    // Pass 2: extract.
    fs::create_dir_all(target).map_err(|e| Error::io(e, target, "create_dir_all"))?;
    let mut extraction = open_archive(archive)?;
    let entries = extraction
        .entries()
        .map_err(|e| Error::archive(format!("reading {} failed: {e}", archive.display())))?;
    let mut written = 0u64;
    for entry in entries {
        let mut entry = entry
            .map_err(|e| Error::archive(format!("reading {} failed: {e}", archive.display())))?;
        let path = entry
            .path()
            .map_err(|e| Error::archive(format!("entry path unreadable: {e}")))?
            .into_owned();
        let dest = entry_destination(target, &path)?;

        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| Error::io(e, &dest, "create_dir_all"))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        let mut out = fs::File::create(&dest).map_err(|e| Error::io(e, &dest, "create"))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| Error::io(e, &dest, "write"))?;
        written += 1;
    }
    Ok(written)
}
