//! Per-node MVCC storage engine
//!
//! Each node owns one `StorageEngine`: a set of collections, each an
//! ordered map from `_id` to a timestamped version chain. Reads go through
//! snapshots pinned to a `ClusterTime`; writes are buffered in
//! `WriteBatch`es and validated first-committer-wins at commit.
//!
//! Durability is checkpoint-based: `checkpoint()` persists the state
//! visible at the stable timestamp; the replication layer replays its oplog
//! above the checkpoint on startup. `rollback_to_stable()` discards
//! versions newer than the stable timestamp, which is how replica-set
//! rollback lands in storage.

pub mod codec;
pub mod engine;
pub mod record_store;
pub mod write_batch;

pub use codec::{FrameReader, FrameWriter};
pub use engine::{CollectionInfo, StorageEngine};
pub use record_store::{RecordStore, VersionChain};
pub use write_batch::{with_write_conflict_retry, WriteBatch, WriteOp};

/// Failpoint name: force `WriteConflict` out of batch commit.
pub const FP_WRITE_CONFLICT: &str = "storage-write-conflict";
