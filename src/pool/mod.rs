//! Constant accumulation across input files.
//!
//! # Architecture
//!
//! Three pieces cooperate per merge session:
//!
//! - [`GlobalPool`]: one deduplicating ordered set per constant kind,
//!   shared by every input file, with journaled overflow rollback;
//! - [`IndexMap`]: per input file, the translation from file-local indices
//!   to canonical constants;
//! - [`Resolver`]: the lazy, memoizing bridge that reads file tables and
//!   fills both.
//!
//! [`GlobalPool::add_file`] is the eager entry point: it enumerates every
//! string/type/field/method table entry of a file (prototypes ride along as
//! method dependencies) and bounds-checks the cumulative distinct counts
//! against the format's 16-bit index ceilings afterwards. Method handles
//! and call sites resolve lazily during class merging.

mod global;
mod index_map;
mod resolver;

pub use global::{GlobalPool, MAX_FIELD_IDS, MAX_METHOD_IDS, MAX_TYPE_IDS};
pub use index_map::IndexMap;
pub use resolver::Resolver;
