//! Chunk migration between shards
//!
//! The coordinator moves one chunk from a donor shard to a recipient in
//! stages: register, snapshot clone, oplog catch-up, session history
//! transfer, a short donor-side critical section, routing commit, then
//! donor-side range cleanup. Every document the migration itself writes is
//! tagged `from_migrate`, so change streams and oplog consumers can tell
//! shard-internal movement apart from client writes.

pub mod coordinator;

pub use coordinator::{MigrationCoordinator, ShardHandle};

/// Failpoint name: pause after the snapshot clone, before catch-up.
pub const FP_MIGRATION_PAUSE_AFTER_CLONE: &str = "migration-pause-after-clone";
/// Failpoint name: pause before entering the donor critical section.
pub const FP_MIGRATION_BEFORE_CRITICAL_SECTION: &str = "migration-before-critical-section";
/// Failpoint name: hold the donor critical section open.
pub const FP_MIGRATION_IN_CRITICAL_SECTION: &str = "migration-in-critical-section";
/// Failpoint name: fail the migration just before the routing commit.
pub const FP_MIGRATION_ABORT_BEFORE_COMMIT: &str = "migration-abort-before-commit";
