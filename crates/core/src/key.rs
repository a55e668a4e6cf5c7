//! Cache key model
//!
//! A [`CacheKey`] identifies one cache entry by `(namespace, group, name,
//! digest)`. Its canonical string form doubles as the storage path prefix on
//! disk and in object storage, and as the URL path for remote stores, so the
//! component grammar is a security boundary: it is what keeps crafted names
//! from traversing out of the storage root or injecting into URLs.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validate a single key component or stored file name.
///
/// Accepted grammar: one or more tokens of ASCII letters, digits, `_` and
/// `-`, joined by single `.` separators. This rules out path separators,
/// empty segments and `..`, so a validated component can never escape the
/// directory (or URL segment) it is placed in.
pub fn validate_component(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!("{label} must not be empty")));
    }
    let mut last_was_dot = true; // rejects a leading dot
    for c in value.chars() {
        match c {
            '.' => {
                if last_was_dot {
                    return Err(Error::validation(format!(
                        "{label} '{value}' contains an empty or repeated dot segment"
                    )));
                }
                last_was_dot = true;
            }
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => last_was_dot = false,
            other => {
                return Err(Error::validation(format!(
                    "{label} '{value}' contains forbidden character '{other}'"
                )));
            }
        }
    }
    if last_was_dot {
        return Err(Error::validation(format!(
            "{label} '{value}' must not end with a dot"
        )));
    }
    Ok(())
}

/// Validate a file name stored under a cache key.
///
/// Same grammar as key components; applied by every store before the name
/// touches a path or URL.
pub fn validate_file_name(file_name: &str) -> Result<()> {
    validate_component("file name", file_name)
}

/// Identifies one cache entry. Immutable once constructed.
///
/// All entries sharing `(namespace, group, name)` across different digests
/// form a *lineage*, the unit over which the disk store counts and evicts
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    namespace: String,
    group: String,
    name: String,
    digest: String,
}

impl CacheKey {
    /// Construct a key, validating every component against the grammar.
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
        digest: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            namespace: namespace.into(),
            group: group.into(),
            name: name.into(),
            digest: digest.into(),
        };
        validate_component("namespace", &key.namespace)?;
        validate_component("group", &key.group)?;
        validate_component("name", &key.name)?;
        validate_component("digest", &key.digest)?;
        Ok(key)
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Canonical form `namespace/group/name/digest`, used verbatim as a
    /// storage path and a wire path.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.namespace, self.group, self.name, self.digest
        )
    }

    /// The lineage prefix `namespace/group/name`, shared by all digests of
    /// the same scope.
    #[must_use]
    pub fn lineage(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.group, self.name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical().cmp(&other.canonical())
    }
}
