//! Aggregated fingerprint input and deterministic digest computation
//!
//! A [`FingerprintInput`] collects everything that may influence the output
//! of one unit of work. Its digest is a SHA-256 over a canonical, newline-
//! joined text form with every sub-collection sorted, so two inputs built
//! from the same logical content always produce the same digest no matter
//! the insertion order.

use crate::hasher::EMPTY_DIGEST;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Format version of the canonical serialization. Bump whenever the field
/// set or the line format changes, so digests never collide across formats.
pub const FINGERPRINT_VERSION: u32 = 2;

/// Declares one output bundle the work will produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBundleSpec {
    /// Bundle alias
    pub name: String,
    /// Include globs selecting the bundle's files
    pub includes: Vec<String>,
}

/// Ordered, versioned aggregation of a unit of work's inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintInput {
    /// Named scalar properties (tool versions, flags, platform)
    pub properties: BTreeMap<String, String>,
    /// Plugin/tool artifact identifier to content hash
    pub tool_artifacts: BTreeMap<String, String>,
    /// Content hashes of module and library dependencies, deduplicated
    pub dependencies: BTreeSet<String>,
    /// Per-file hashes under the main output root, if one exists
    pub main_output_hashes: Option<BTreeMap<String, String>>,
    /// Per-file hashes under the test output root, if one exists
    pub test_output_hashes: Option<BTreeMap<String, String>>,
    /// Active build profiles
    pub profiles: Vec<String>,
    /// Free-text invocation argument line
    pub arg_line: String,
    /// Test-selection filter, if any
    pub test_filter: Option<String>,
    /// Bundles the work declares it will produce
    pub output_bundles: Vec<OutputBundleSpec>,
    /// Excluded scopes
    pub exclusions: Vec<String>,
}

impl FingerprintInput {
    /// Canonical newline-joined text form, fixed field order.
    ///
    /// The well-known empty digest is filtered from the dependency section so
    /// that "no dependencies" and "dependencies that all hash empty" fall
    /// into the same digest family.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "version:{FINGERPRINT_VERSION}");
        for (name, value) in &self.properties {
            let _ = writeln!(out, "property:{name}={value}");
        }
        for (id, hash) in &self.tool_artifacts {
            let _ = writeln!(out, "tool:{id}={hash}");
        }
        for hash in &self.dependencies {
            if hash == EMPTY_DIGEST {
                continue;
            }
            let _ = writeln!(out, "dependency:{hash}");
        }
        if let Some(hashes) = &self.main_output_hashes {
            for (path, hash) in hashes {
                let _ = writeln!(out, "main:{path}={hash}");
            }
        }
        if let Some(hashes) = &self.test_output_hashes {
            for (path, hash) in hashes {
                let _ = writeln!(out, "test:{path}={hash}");
            }
        }
        let mut profiles = self.profiles.clone();
        profiles.sort();
        profiles.dedup();
        for profile in &profiles {
            let _ = writeln!(out, "profile:{profile}");
        }
        let _ = writeln!(out, "args:{}", self.arg_line);
        if let Some(filter) = &self.test_filter {
            let _ = writeln!(out, "testFilter:{filter}");
        }
        let mut bundles: Vec<&OutputBundleSpec> = self.output_bundles.iter().collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));
        for bundle in bundles {
            let _ = writeln!(out, "bundle:{}={}", bundle.name, bundle.includes.join(","));
        }
        let mut exclusions = self.exclusions.clone();
        exclusions.sort();
        for exclusion in &exclusions {
            let _ = writeln!(out, "exclusion:{exclusion}");
        }
        out
    }

    /// Hex SHA-256 of the canonical text; this is the cache key digest.
    #[must_use]
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_text().as_bytes()))
    }
}
