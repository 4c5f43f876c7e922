//! Domain layer - pure business logic with no external dependencies.
//!
//! This layer contains the rules of the subsystem:
//! - Grammars for number prefixes, suffixes and periods
//! - Counter scopes and the numbers they issue
//! - Archive records and content digests
//! - Admission policies and the keys of rate windows
//!
//! Nothing here performs I/O or takes locks.

pub mod archive;
pub mod caller;
pub mod pattern;
pub mod policy;
pub mod scope;
