//! Terminal outcomes of a cache-driven execution

use serde::{Deserialize, Serialize};

/// Terminal state of one unit of work driven through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum Outcome {
    /// Every listed bundle was restored; the work never ran
    FromCache,
    /// Cache bypassed; the work ran without consulting the store
    SkippedCache,
    /// The work ran and reported failures; nothing was cached
    Failed,
    /// The work ran but produced nothing worth caching
    Empty,
    /// The work ran and its bundles were packed and written
    Stored,
}

/// What the work reports back after running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkReport {
    /// Meaningful units completed (compiled sources, executed tests, ...)
    pub completed_units: u64,
    /// Units that failed
    pub failures: u64,
}

/// Human-readable summary line for an outcome. `None` means there is
/// nothing worth telling the user beyond the work's own output.
#[must_use]
pub fn message(outcome: Outcome, report: &WorkReport) -> Option<String> {
    match outcome {
        Outcome::FromCache => Some("outputs restored from cache, execution skipped".to_string()),
        Outcome::SkippedCache => None,
        Outcome::Failed => Some(format!(
            "{} unit(s) failed, result not cached",
            report.failures
        )),
        Outcome::Empty => Some("nothing produced, nothing cached".to_string()),
        Outcome::Stored => Some(format!(
            "{} unit(s) completed, outputs cached",
            report.completed_units
        )),
    }
}
