//! Sharding integration suite.
//!
//! Routing through a stale-retrying cache, chunk migration end to end,
//! and retryable writes across topology changes. Chunk map arithmetic
//! and the migration stage machine are unit-tested in their crates.

#[path = "../common/mod.rs"]
mod common;

mod migration;
mod retryable;
mod routing;
