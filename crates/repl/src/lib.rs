//! Replication: oplog, replica sets, recovery
//!
//! A `ReplicaSet` is one primary and N secondaries, each owning a
//! `StorageEngine`. The primary assigns `OpTime`s, appends to its oplog,
//! and applies locally; secondaries apply the same entries idempotently in
//! timestamp order. The majority commit point (the highest optime
//! replicated to a strict majority) drives the stable timestamp pushed into
//! every member's storage.
//!
//! Startup recovery replays the durable oplog above the newest checkpoint.
//! Replay is idempotent, so a recovery interrupted part-way (crash, test
//! failpoint) converges on rerun.

pub mod oplog;
pub mod recovery;
pub mod replica_set;
pub mod session;

pub use oplog::{CommandKind, EntryBody, OpKind, Oplog, OplogEntry, SessionInfo};
pub use recovery::recover_node;
pub use replica_set::{command_body, MemberRole, ReplicaSet, WriteConcern};
pub use session::{SessionHistoryEntry, SessionRegistry};

/// Failpoint name: abort oplog replay after each applied entry.
pub const FP_RECOVERY_ABORT_REPLAY: &str = "recovery-abort-replay";
