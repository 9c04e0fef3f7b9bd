//! Planner integration suite.
//!
//! Plan caching and index use as seen through the cluster's find path.
//! Trial ranking, works accounting, and eviction arithmetic are
//! unit-tested in crates/planner/src/.

#[path = "../common/mod.rs"]
mod common;

mod plan_cache;
