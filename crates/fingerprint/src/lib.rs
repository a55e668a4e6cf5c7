//! Deterministic fingerprinting of build inputs
//!
//! Turns a unit of work's declared inputs into a stable cache digest:
//! - [`HashContext`] hashes files, trees and archives with a per-invocation,
//!   staleness-checked result cache
//! - [`FingerprintInput`] aggregates the hashes with scalar properties into a
//!   canonical text form whose SHA-256 is the cache key digest
//!
//! The determinism contract is byte-stable keys across runs and machines:
//! equal input content produces an identical digest regardless of insertion
//! order, archive timestamps or directory walk order.

mod hasher;
mod input;

pub use hasher::{EMPTY_DIGEST, HashContext, Sensitivity};
pub use input::{FINGERPRINT_VERSION, FingerprintInput, OutputBundleSpec};
