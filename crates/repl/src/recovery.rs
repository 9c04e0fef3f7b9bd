//! Startup recovery: checkpoint + oplog replay
//!
//! A node recovers by loading its newest intact checkpoint and replaying
//! every durable oplog entry above the checkpoint timestamp. Replay is
//! idempotent (entries install versions at their recorded timestamps), so
//! recovery that crashes part-way through — or is aborted by the
//! `recovery-abort-replay` failpoint — can simply be run again and lands
//! in the same state.

use crate::oplog::Oplog;
use crate::replica_set::apply_entry;
use crate::FP_RECOVERY_ABORT_REPLAY;
use std::path::Path;
use tessera_core::{failpoint, Error, OpTime, Result, StorageConfig};
use tessera_storage::StorageEngine;
use tracing::info;

/// Recover one node's storage from `dir`.
///
/// Returns the engine, the oplog, and the node's last applied optime.
pub fn recover_node(dir: &Path, config: StorageConfig) -> Result<(StorageEngine, Oplog, OpTime)> {
    let engine = StorageEngine::open(dir, config)?;
    let oplog = Oplog::open(dir)?;

    let checkpoint_ts = engine.stable_timestamp();
    let replay = oplog.entries_after(checkpoint_ts);
    let replay_count = replay.len();

    let mut last_applied = OpTime {
        term: replay.first().map(|e| e.optime.term).unwrap_or(1),
        ts: checkpoint_ts,
    };
    for entry in &replay {
        apply_entry(&engine, entry)?;
        last_applied = entry.optime;
        if failpoint::hit(FP_RECOVERY_ABORT_REPLAY) {
            return Err(Error::InvalidOperation(format!(
                "oplog replay aborted at {} by failpoint",
                entry.optime
            )));
        }
    }
    if let Some(optime) = oplog.last_optime() {
        last_applied = optime;
    }

    info!(
        checkpoint = %checkpoint_ts,
        replayed = replay_count,
        last_applied = %last_applied,
        "node recovery complete"
    );
    Ok((engine, oplog, last_applied))
}
