//! Change stream integration suite.
//!
//! Cluster-wide ordering, majority-commit visibility, invalidation, and
//! resume semantics over real topology changes. Token encoding and
//! per-entry translation are unit-tested in crates/changestream/src/.

#[path = "../common/mod.rs"]
mod common;

mod events;
mod resume;
