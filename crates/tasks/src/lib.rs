//! Cache orchestration for kiln
//!
//! [`CacheController`] drives a unit of work through the cache: restore on a
//! consistent hit, run on a miss or bypass, pack and publish on success. The
//! work itself stays behind the narrow [`CacheableWork`] trait; the
//! controller never learns anything else about it.
//!
//! Terminal states are [`Outcome`] values; [`message`] turns one into a
//! user-facing line.

mod controller;
mod outcome;

pub use controller::{
    ARTIFACTS_FILE, CacheController, CacheableWork, Execution, FINGERPRINT_FILE, OutputArtifact,
};
pub use outcome::{Outcome, WorkReport, message};
