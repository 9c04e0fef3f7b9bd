//! The oplog: ordered log of applied write operations
//!
//! Entries are stamped with strictly increasing `ClusterTime`s. Each entry
//! carries everything a consumer needs:
//! - the operation itself (insert / update / delete / command / noop)
//! - `from_migrate`: set on writes performed on behalf of a chunk
//!   migration (recipient clone inserts, donor range cleanup deletes);
//!   change streams and session bookkeeping skip these
//! - optional retryable-write session identity (`lsid`, `txnNumber`,
//!   `stmtId`) and its recorded result
//! - pre/post images for update/delete, when the collection records them;
//!   image retention is bounded by oplog trimming
//!
//! The log is optionally durable: entries append to a framed `oplog.log`
//! through the storage codec, synced per batch.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_core::{
    ClusterTime, Document, DocumentId, Error, NamespaceId, OpTime, Result, SessionId, StmtId,
    TxnNumber,
};
use tessera_storage::{FrameReader, FrameWriter};
use uuid::Uuid;

/// Retryable-write identity attached to an oplog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub lsid: SessionId,
    pub txn_number: TxnNumber,
    pub stmt_id: StmtId,
}

/// The operation an oplog entry records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    Insert {
        doc: Document,
    },
    Update {
        post: Document,
        pre: Option<Document>,
    },
    Delete {
        id: DocumentId,
        pre: Option<Document>,
    },
    /// DDL recorded in-line (create/drop collection)
    Command {
        command: CommandKind,
    },
    /// No data change. Carries session history during chunk migration and
    /// the recorded result of the original statement.
    Noop {
        payload: Value,
    },
}

/// DDL commands that replicate through the oplog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    CreateCollection,
    DropCollection,
}

/// Entry content minus the optime; the primary assigns the optime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryBody {
    pub ns: NamespaceId,
    /// Collection UUID (resume-token identity)
    pub ui: Uuid,
    pub op: OpKind,
    pub from_migrate: bool,
    pub session: Option<SessionInfo>,
}

/// One oplog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogEntry {
    pub optime: OpTime,
    pub wall: DateTime<Utc>,
    pub ns: NamespaceId,
    pub ui: Uuid,
    pub op: OpKind,
    pub from_migrate: bool,
    pub session: Option<SessionInfo>,
}

impl OplogEntry {
    /// The document id this entry touches, if it is a data op.
    pub fn document_id(&self) -> Option<DocumentId> {
        match &self.op {
            OpKind::Insert { doc } => Some(doc.id()),
            OpKind::Update { post, .. } => Some(post.id()),
            OpKind::Delete { id, .. } => Some(id.clone()),
            OpKind::Command { .. } | OpKind::Noop { .. } => None,
        }
    }

    pub fn is_data_op(&self) -> bool {
        matches!(
            self.op,
            OpKind::Insert { .. } | OpKind::Update { .. } | OpKind::Delete { .. }
        )
    }
}

/// Append-only oplog with optional durability
#[derive(Debug)]
pub struct Oplog {
    entries: RwLock<Vec<OplogEntry>>,
    durable_path: Option<PathBuf>,
    trimmed: AtomicBool,
}

impl Oplog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            durable_path: None,
            trimmed: AtomicBool::new(false),
        }
    }

    /// Durable oplog backed by `<dir>/oplog.log`, loading any existing
    /// entries (torn tail discarded by the frame reader).
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("oplog.log");
        let entries = if path.exists() {
            let mut reader = FrameReader::open(&path)?;
            reader.read_all()?
        } else {
            Vec::new()
        };
        Ok(Self {
            entries: RwLock::new(entries),
            durable_path: Some(path),
            trimmed: AtomicBool::new(false),
        })
    }

    /// Append entries. Timestamps must continue the strictly increasing
    /// sequence.
    pub fn append(&self, batch: &[OplogEntry]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write();
        let mut last = entries.last().map(|e| e.optime.ts);
        for entry in batch {
            if let Some(prev) = last {
                if entry.optime.ts <= prev {
                    return Err(Error::InvalidOperation(format!(
                        "oplog timestamps must increase: {} after {}",
                        entry.optime.ts, prev
                    )));
                }
            }
            last = Some(entry.optime.ts);
        }
        if let Some(path) = &self.durable_path {
            let mut writer = FrameWriter::append(path)?;
            for entry in batch {
                writer.write_record(entry)?;
            }
            writer.sync()?;
        }
        entries.extend_from_slice(batch);
        Ok(())
    }

    /// Entries with `ts` strictly greater than `after`.
    pub fn entries_after(&self, after: ClusterTime) -> Vec<OplogEntry> {
        let entries = self.entries.read();
        let start = entries.partition_point(|e| e.optime.ts <= after);
        entries[start..].to_vec()
    }

    /// Entries with `after < ts <= upto`.
    pub fn entries_between(&self, after: ClusterTime, upto: ClusterTime) -> Vec<OplogEntry> {
        let entries = self.entries.read();
        let start = entries.partition_point(|e| e.optime.ts <= after);
        let end = entries.partition_point(|e| e.optime.ts <= upto);
        entries[start..end].to_vec()
    }

    pub fn first_ts(&self) -> Option<ClusterTime> {
        self.entries.read().first().map(|e| e.optime.ts)
    }

    pub fn last_optime(&self) -> Option<OpTime> {
        self.entries.read().last().map(|e| e.optime)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether a consumer resuming from `ts` can still be served.
    ///
    /// History that has never been trimmed is complete by construction,
    /// even when it starts above `ts` (a shard whose first entry arrived
    /// after the resume point missed nothing). Once trimming has
    /// discarded entries, the resume point must sit at or above the
    /// first retained one.
    pub fn covers(&self, ts: ClusterTime) -> bool {
        if !self.trimmed.load(Ordering::Relaxed) {
            return true;
        }
        match self.first_ts() {
            None => false,
            Some(first) => first <= ts,
        }
    }

    /// Trim entries below `floor`, capped by the stable timestamp: entries
    /// at or above `stable` are always retained, as is a minimum count of
    /// `keep_at_least` newest entries.
    pub fn trim_below(&self, floor: ClusterTime, stable: ClusterTime, keep_at_least: usize) {
        let mut entries = self.entries.write();
        let limit = floor.min(stable);
        let mut cut = entries.partition_point(|e| e.optime.ts < limit);
        if entries.len() - cut < keep_at_least {
            cut = entries.len().saturating_sub(keep_at_least);
        }
        if cut > 0 {
            entries.drain(..cut);
            self.trimmed.store(true, Ordering::Relaxed);
        }
    }

    /// Drop in-memory entries with `ts > after` (rollback). The durable
    /// file is rewritten to match.
    pub fn truncate_after(&self, after: ClusterTime) -> Result<()> {
        let mut entries = self.entries.write();
        let keep = entries.partition_point(|e| e.optime.ts <= after);
        if keep == entries.len() {
            return Ok(());
        }
        entries.truncate(keep);
        if let Some(path) = &self.durable_path {
            let mut writer = FrameWriter::create(path)?;
            for entry in entries.iter() {
                writer.write_record(entry)?;
            }
            writer.sync()?;
        }
        Ok(())
    }
}

impl Default for Oplog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(secs: u32, id: i64) -> OplogEntry {
        OplogEntry {
            optime: OpTime::new(1, ClusterTime::new(secs, 0)),
            wall: Utc::now(),
            ns: NamespaceId::new("db", "c"),
            ui: Uuid::nil(),
            op: OpKind::Insert {
                doc: Document::parse(&format!(r#"{{"_id": {id}}}"#)).unwrap(),
            },
            from_migrate: false,
            session: None,
        }
    }

    #[test]
    fn append_enforces_increasing_timestamps() {
        let oplog = Oplog::new();
        oplog.append(&[entry(1, 1), entry(2, 2)]).unwrap();
        assert!(oplog.append(&[entry(2, 3)]).is_err());
        assert_eq!(oplog.len(), 2);
    }

    #[test]
    fn entries_after_is_exclusive() {
        let oplog = Oplog::new();
        oplog.append(&[entry(1, 1), entry(2, 2), entry(3, 3)]).unwrap();
        let tail = oplog.entries_after(ClusterTime::new(2, 0));
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].optime.ts, ClusterTime::new(3, 0));
    }

    #[test]
    fn trim_never_crosses_stable() {
        let oplog = Oplog::new();
        oplog
            .append(&[entry(1, 1), entry(2, 2), entry(3, 3), entry(4, 4)])
            .unwrap();
        oplog.trim_below(ClusterTime::new(10, 0), ClusterTime::new(3, 0), 0);
        assert_eq!(oplog.first_ts(), Some(ClusterTime::new(3, 0)));
    }

    #[test]
    fn trim_keeps_minimum_entries() {
        let oplog = Oplog::new();
        oplog
            .append(&[entry(1, 1), entry(2, 2), entry(3, 3), entry(4, 4)])
            .unwrap();
        oplog.trim_below(ClusterTime::new(10, 0), ClusterTime::new(10, 0), 3);
        assert_eq!(oplog.len(), 3);
    }

    #[test]
    fn durable_roundtrip_with_truncate() {
        let dir = tempfile::tempdir().unwrap();
        {
            let oplog = Oplog::open(dir.path()).unwrap();
            oplog.append(&[entry(1, 1), entry(2, 2), entry(3, 3)]).unwrap();
            oplog.truncate_after(ClusterTime::new(2, 0)).unwrap();
        }
        let oplog = Oplog::open(dir.path()).unwrap();
        assert_eq!(oplog.len(), 2);
        assert_eq!(oplog.last_optime().unwrap().ts, ClusterTime::new(2, 0));
    }

    #[test]
    fn covers_tracks_trimming() {
        let oplog = Oplog::new();
        oplog.append(&[entry(5, 1), entry(6, 2), entry(7, 3)]).unwrap();
        // Untrimmed history serves any resume point.
        assert!(oplog.covers(ClusterTime::new(2, 0)));

        oplog.trim_below(ClusterTime::new(6, 0), ClusterTime::new(7, 0), 0);
        assert!(oplog.covers(ClusterTime::new(6, 0)));
        assert!(!oplog.covers(ClusterTime::new(2, 0)));
    }
}
