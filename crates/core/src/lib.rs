//! Shared foundation for the kiln build-result cache
//!
//! This crate holds what every other kiln crate agrees on:
//! - the [`CacheKey`] model and the filename grammar that makes keys safe to
//!   use as storage paths and URL segments
//! - the error taxonomy ([`Error`]) separating fatal validation and protocol
//!   errors from recoverable storage faults
//! - the resolved [`CacheConfig`] surface handed in by the host orchestrator

mod config;
mod error;
mod key;

pub use config::{BundleConfig, CacheConfig, StoreBackend};
pub use error::{Error, Result};
pub use key::{CacheKey, validate_component, validate_file_name};
