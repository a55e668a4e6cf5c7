//! Output bundling for kiln cache entries
//!
//! [`IncludeSet`] selects files under a directory tree with Ant-style glob
//! patterns; [`pack`]/[`unpack`] move the selection through a single
//! compressed container. Unpacking is hardened against crafted entry names:
//! any entry that would resolve outside the target directory aborts the
//! whole operation before a byte is written.

mod codec;
mod select;

pub use codec::{ArchiveSummary, pack, unpack};
pub use select::IncludeSet;
