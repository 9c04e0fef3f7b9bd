//! Write batches and conflict retry
//!
//! A `WriteBatch` buffers writes taken against a snapshot (`read_ts`) and
//! validates them first-committer-wins at commit: if any written id has a
//! committed version newer than the batch's read timestamp, the whole batch
//! fails with `WriteConflict` and nothing is applied.
//!
//! `with_write_conflict_retry` is the bounded retry loop callers wrap
//! around operations that may conflict. The `storage-write-conflict`
//! failpoint injects a conflict on the next commit, which is how tests
//! exercise the retry path.

use crate::engine::StorageEngine;
use crate::FP_WRITE_CONFLICT;
use tessera_core::{
    failpoint, ClusterTime, Document, DocumentId, Error, NamespaceId, Result, StorageConfig,
};
use tracing::debug;

/// One buffered write
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert(Document),
    Update(Document),
    Delete(DocumentId),
}

impl WriteOp {
    fn id(&self) -> DocumentId {
        match self {
            WriteOp::Insert(doc) | WriteOp::Update(doc) => doc.id(),
            WriteOp::Delete(id) => id.clone(),
        }
    }
}

/// Snapshot-anchored buffered writes
#[derive(Debug)]
pub struct WriteBatch {
    read_ts: ClusterTime,
    ops: Vec<(NamespaceId, WriteOp)>,
}

impl WriteBatch {
    pub fn new(read_ts: ClusterTime) -> Self {
        Self {
            read_ts,
            ops: Vec::new(),
        }
    }

    pub fn read_ts(&self) -> ClusterTime {
        self.read_ts
    }

    pub fn insert(&mut self, ns: NamespaceId, doc: Document) {
        self.push(ns, WriteOp::Insert(doc));
    }

    pub fn update(&mut self, ns: NamespaceId, doc: Document) {
        self.push(ns, WriteOp::Update(doc));
    }

    pub fn delete(&mut self, ns: NamespaceId, id: DocumentId) {
        self.push(ns, WriteOp::Delete(id));
    }

    pub fn push(&mut self, ns: NamespaceId, op: WriteOp) {
        self.ops.push((ns, op));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Validate and apply at `commit_ts`.
    ///
    /// All-or-nothing: validation of every op happens before any write is
    /// installed.
    pub fn commit(self, engine: &StorageEngine, commit_ts: ClusterTime) -> Result<ClusterTime> {
        if failpoint::hit(FP_WRITE_CONFLICT) {
            debug!("write conflict injected by failpoint");
            return Err(Error::WriteConflict);
        }

        for (ns, op) in &self.ops {
            if let Some(newest) = engine.newest_ts(ns, &op.id()) {
                if newest > self.read_ts {
                    return Err(Error::WriteConflict);
                }
            }
        }

        for (ns, op) in self.ops {
            match op {
                WriteOp::Insert(doc) => engine.insert_at(&ns, doc, commit_ts, true)?,
                WriteOp::Update(doc) => engine.update_at(&ns, doc, commit_ts)?,
                WriteOp::Delete(id) => engine.delete_at(&ns, &id, commit_ts)?,
            }
        }
        Ok(commit_ts)
    }
}

/// Bounded retry loop for operations that may hit `WriteConflict`.
///
/// Any other error aborts immediately. Exhausting the attempt budget
/// surfaces the final `WriteConflict` to the caller.
pub fn with_write_conflict_retry<T>(
    config: &StorageConfig,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = config.write_conflict_retries.max(1);
    let mut last = Error::WriteConflict;
    for attempt in 0..attempts {
        match op() {
            Err(Error::WriteConflict) => {
                debug!(attempt, "retrying after write conflict");
                last = Error::WriteConflict;
            }
            other => return other,
        }
    }
    Err(last)
}
