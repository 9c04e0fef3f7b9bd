//! Storage engine: collections, timestamps, checkpoints
//!
//! Owns every collection of one node plus the timestamp bookkeeping the
//! replication layer drives:
//!
//! - **stable timestamp** — highest timestamp known majority-committed;
//!   checkpoints never include anything newer.
//! - **oldest timestamp** — floor below which version history may be
//!   discarded; snapshot reads below it fail with `SnapshotTooOld`.
//!
//! Checkpoints persist the state visible at the stable timestamp into
//! `checkpoint-<secs>-<inc>.ckpt` (framed rmp-serde + crc32). `open()`
//! recovers from the newest intact checkpoint; a corrupt newest file falls
//! back to the previous one, which is what makes restart-during-restore
//! recovery idempotent.

use crate::codec::{FrameReader, FrameWriter};
use crate::record_store::RecordStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tessera_core::{
    ClusterTime, Document, DocumentId, Error, NamespaceId, Result, StorageConfig,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Catalog entry for one collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Stable identity across renames; baked into resume tokens.
    pub uuid: Uuid,
    pub store: RecordStore,
}

impl CollectionInfo {
    fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            store: RecordStore::new(),
        }
    }
}

/// One durable checkpoint: flattened state at the stable timestamp
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    ts: ClusterTime,
    collections: Vec<CheckpointCollection>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointCollection {
    ns: NamespaceId,
    uuid: Uuid,
    documents: Vec<(DocumentId, Document)>,
}

/// Per-node MVCC storage engine
#[derive(Debug)]
pub struct StorageEngine {
    collections: RwLock<HashMap<NamespaceId, CollectionInfo>>,
    stable_ts: RwLock<ClusterTime>,
    oldest_ts: RwLock<ClusterTime>,
    data_dir: Option<PathBuf>,
    config: StorageConfig,
}

impl StorageEngine {
    /// In-memory engine (no checkpoint directory).
    pub fn new(config: StorageConfig) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            stable_ts: RwLock::new(ClusterTime::ZERO),
            oldest_ts: RwLock::new(ClusterTime::ZERO),
            data_dir: None,
            config,
        }
    }

    /// Open an engine rooted at `dir`, recovering from the newest intact
    /// checkpoint if one exists.
    pub fn open(dir: &Path, config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut engine = Self::new(config);
        engine.data_dir = Some(dir.to_path_buf());

        let mut candidates = checkpoint_files(dir)?;
        // Newest first; fall back on corruption.
        candidates.sort();
        candidates.reverse();
        for path in candidates {
            match load_checkpoint(&path) {
                Ok(ckpt) => {
                    info!(ts = %ckpt.ts, path = %path.display(), "recovered from checkpoint");
                    let mut collections = engine.collections.write();
                    for coll in ckpt.collections {
                        let mut info = CollectionInfo::new(coll.uuid);
                        for (id, doc) in coll.documents {
                            info.store.put(id, doc, ckpt.ts);
                        }
                        collections.insert(coll.ns, info);
                    }
                    drop(collections);
                    *engine.stable_ts.write() = ckpt.ts;
                    *engine.oldest_ts.write() = ckpt.ts;
                    return Ok(engine);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint");
                }
            }
        }
        Ok(engine)
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Create a collection, returning its UUID. Creating an existing
    /// collection returns the existing UUID (idempotent for replay).
    pub fn create_collection(&self, ns: &NamespaceId) -> Uuid {
        let mut collections = self.collections.write();
        collections
            .entry(ns.clone())
            .or_insert_with(|| CollectionInfo::new(Uuid::new_v4()))
            .uuid
    }

    /// Create a collection with a caller-chosen UUID. Replicated DDL uses
    /// this so every member agrees on the collection's identity.
    pub fn create_collection_with_uuid(&self, ns: &NamespaceId, uuid: Uuid) {
        let mut collections = self.collections.write();
        collections
            .entry(ns.clone())
            .or_insert_with(|| CollectionInfo::new(uuid));
    }

    pub fn drop_collection(&self, ns: &NamespaceId) -> Result<Uuid> {
        let mut collections = self.collections.write();
        collections
            .remove(ns)
            .map(|info| info.uuid)
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))
    }

    pub fn collection_uuid(&self, ns: &NamespaceId) -> Option<Uuid> {
        self.collections.read().get(ns).map(|info| info.uuid)
    }

    pub fn collection_names(&self) -> Vec<NamespaceId> {
        self.collections.read().keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Writes (timestamped; called by the replication apply path)
    // ------------------------------------------------------------------

    /// Install an inserted document at `ts`.
    ///
    /// `enforce_unique` is off during oplog re-application, where a second
    /// install of the same entry must be a no-op rather than an error.
    pub fn insert_at(
        &self,
        ns: &NamespaceId,
        doc: Document,
        ts: ClusterTime,
        enforce_unique: bool,
    ) -> Result<()> {
        let mut collections = self.collections.write();
        let info = collections
            .entry(ns.clone())
            .or_insert_with(|| CollectionInfo::new(Uuid::new_v4()));
        let id = doc.id();
        if enforce_unique {
            if let Some(newest) = info.store.newest_ts(&id) {
                if newest != ts && info.store.get_at(&id, newest).is_some() {
                    return Err(Error::DuplicateKey(id));
                }
            }
        }
        info.store.put(id, doc, ts);
        Ok(())
    }

    /// Install an updated document at `ts`.
    pub fn update_at(&self, ns: &NamespaceId, doc: Document, ts: ClusterTime) -> Result<()> {
        let mut collections = self.collections.write();
        let info = collections
            .get_mut(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))?;
        info.store.put(doc.id(), doc, ts);
        Ok(())
    }

    /// Install a delete tombstone at `ts`.
    pub fn delete_at(&self, ns: &NamespaceId, id: &DocumentId, ts: ClusterTime) -> Result<()> {
        let mut collections = self.collections.write();
        let info = collections
            .get_mut(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))?;
        info.store.remove(id.clone(), ts);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshot reads
    // ------------------------------------------------------------------

    fn check_read_ts(&self, ts: ClusterTime) -> Result<()> {
        let oldest = *self.oldest_ts.read();
        if ts < oldest {
            return Err(Error::SnapshotTooOld {
                requested: ts.to_string(),
                oldest: oldest.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_at(
        &self,
        ns: &NamespaceId,
        id: &DocumentId,
        ts: ClusterTime,
    ) -> Result<Option<Document>> {
        self.check_read_ts(ts)?;
        let collections = self.collections.read();
        Ok(collections
            .get(ns)
            .and_then(|info| info.store.get_at(id, ts).cloned()))
    }

    /// All documents visible at `ts`, in id order.
    pub fn scan_at(&self, ns: &NamespaceId, ts: ClusterTime) -> Result<Vec<Document>> {
        self.check_read_ts(ts)?;
        let collections = self.collections.read();
        Ok(collections
            .get(ns)
            .map(|info| info.store.scan_at(ts).map(|(_, d)| d.clone()).collect())
            .unwrap_or_default())
    }

    pub fn count_at(&self, ns: &NamespaceId, ts: ClusterTime) -> Result<usize> {
        self.check_read_ts(ts)?;
        let collections = self.collections.read();
        Ok(collections
            .get(ns)
            .map(|info| info.store.count_at(ts))
            .unwrap_or(0))
    }

    /// Newest committed timestamp for an id (conflict validation).
    pub fn newest_ts(&self, ns: &NamespaceId, id: &DocumentId) -> Option<ClusterTime> {
        self.collections
            .read()
            .get(ns)
            .and_then(|info| info.store.newest_ts(id))
    }

    /// True when the newest version of `id` is a live document (not a
    /// tombstone, not absent). This is the uniqueness check inserts use.
    pub fn is_live(&self, ns: &NamespaceId, id: &DocumentId) -> bool {
        let collections = self.collections.read();
        collections
            .get(ns)
            .and_then(|info| {
                info.store
                    .newest_ts(id)
                    .and_then(|ts| info.store.get_at(id, ts))
            })
            .is_some()
    }

    // ------------------------------------------------------------------
    // Timestamps
    // ------------------------------------------------------------------

    /// Advance the stable timestamp. Never moves backwards.
    pub fn set_stable_timestamp(&self, ts: ClusterTime) {
        let mut stable = self.stable_ts.write();
        if ts > *stable {
            *stable = ts;
        }
    }

    pub fn stable_timestamp(&self) -> ClusterTime {
        *self.stable_ts.read()
    }

    pub fn oldest_timestamp(&self) -> ClusterTime {
        *self.oldest_ts.read()
    }

    /// Advance the oldest timestamp and prune history below it. Clamped to
    /// the stable timestamp and the configured history window.
    pub fn advance_oldest_timestamp(&self, requested: ClusterTime) {
        let stable = self.stable_timestamp();
        let floor_secs = stable
            .secs
            .saturating_sub(self.config.history_window_secs);
        let mut target = requested.min(stable);
        if target.secs < floor_secs {
            target = ClusterTime::new(floor_secs, 0);
        }
        let mut oldest = self.oldest_ts.write();
        if target <= *oldest {
            return;
        }
        *oldest = target;
        drop(oldest);

        let mut collections = self.collections.write();
        for info in collections.values_mut() {
            info.store.prune_below(target);
        }
        debug!(oldest = %target, "advanced oldest timestamp");
    }

    /// Discard all versions newer than the stable timestamp.
    pub fn rollback_to_stable(&self) -> ClusterTime {
        let stable = self.stable_timestamp();
        let mut collections = self.collections.write();
        for info in collections.values_mut() {
            info.store.rollback_to(stable);
        }
        info!(stable = %stable, "rolled back to stable timestamp");
        stable
    }

    // ------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------

    /// Persist a checkpoint at the current stable timestamp.
    pub fn checkpoint(&self) -> Result<ClusterTime> {
        let dir = self
            .data_dir
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("engine has no data directory".into()))?;
        let ts = self.stable_timestamp();

        let collections = self.collections.read();
        let payload = CheckpointFile {
            ts,
            collections: collections
                .iter()
                .map(|(ns, info)| CheckpointCollection {
                    ns: ns.clone(),
                    uuid: info.uuid,
                    documents: info.store.flattened_at(ts),
                })
                .collect(),
        };
        drop(collections);

        let path = dir.join(format!("checkpoint-{:010}-{:010}.ckpt", ts.secs, ts.inc));
        let tmp = dir.join(format!("checkpoint-{:010}-{:010}.tmp", ts.secs, ts.inc));
        let mut writer = FrameWriter::create(&tmp)?;
        writer.write_record(&payload)?;
        writer.sync()?;
        drop(writer);
        std::fs::rename(&tmp, &path)?;
        info!(ts = %ts, path = %path.display(), "checkpoint written");
        Ok(ts)
    }
}

fn checkpoint_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with("checkpoint-") && name.ends_with(".ckpt") {
                out.push(path);
            }
        }
    }
    Ok(out)
}

fn load_checkpoint(path: &Path) -> Result<CheckpointFile> {
    let mut reader = FrameReader::open(path)?;
    reader
        .read_record()?
        .ok_or_else(|| Error::Corruption(format!("empty checkpoint {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i64, n: i64) -> Document {
        Document::parse(&format!(r#"{{"_id": {id}, "n": {n}}}"#)).unwrap()
    }

    fn ts(secs: u32) -> ClusterTime {
        ClusterTime::new(secs, 0)
    }

    fn test_ns() -> NamespaceId {
        NamespaceId::new("testdb", "c")
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let engine = StorageEngine::new(StorageConfig::default());
        let ns = test_ns();
        engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
        let err = engine.insert_at(&ns, doc(1, 1), ts(2), true).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[test]
    fn replay_reinsert_at_same_ts_is_noop() {
        let engine = StorageEngine::new(StorageConfig::default());
        let ns = test_ns();
        engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
        // Re-application of the same oplog entry.
        engine.insert_at(&ns, doc(1, 0), ts(1), false).unwrap();
        assert_eq!(engine.count_at(&ns, ts(2)).unwrap(), 1);
    }

    #[test]
    fn insert_after_delete_is_allowed() {
        let engine = StorageEngine::new(StorageConfig::default());
        let ns = test_ns();
        engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
        engine.delete_at(&ns, &DocumentId::int(1), ts(2)).unwrap();
        engine.insert_at(&ns, doc(1, 5), ts(3), true).unwrap();
        assert_eq!(engine.count_at(&ns, ts(4)).unwrap(), 1);
    }

    #[test]
    fn snapshot_too_old_below_oldest() {
        let engine = StorageEngine::new(StorageConfig::default());
        let ns = test_ns();
        engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
        engine.set_stable_timestamp(ts(50));
        engine.advance_oldest_timestamp(ts(40));

        let err = engine.get_at(&ns, &DocumentId::int(1), ts(5)).unwrap_err();
        assert!(matches!(err, Error::SnapshotTooOld { .. }));
        assert!(engine.get_at(&ns, &DocumentId::int(1), ts(45)).is_ok());
    }

    #[test]
    fn stable_timestamp_never_regresses() {
        let engine = StorageEngine::new(StorageConfig::default());
        engine.set_stable_timestamp(ts(10));
        engine.set_stable_timestamp(ts(5));
        assert_eq!(engine.stable_timestamp(), ts(10));
    }

    #[test]
    fn rollback_to_stable_discards_unstable_writes() {
        let engine = StorageEngine::new(StorageConfig::default());
        let ns = test_ns();
        engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
        engine.set_stable_timestamp(ts(1));
        engine.insert_at(&ns, doc(2, 0), ts(5), true).unwrap();

        engine.rollback_to_stable();

        assert_eq!(engine.count_at(&ns, ts(10)).unwrap(), 1);
    }

    #[test]
    fn checkpoint_and_reopen_restores_stable_state() {
        let dir = tempfile::tempdir().unwrap();
        let ns = test_ns();
        {
            let engine = StorageEngine::open(dir.path(), StorageConfig::default()).unwrap();
            engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
            engine.insert_at(&ns, doc(2, 0), ts(2), true).unwrap();
            engine.set_stable_timestamp(ts(1));
            // Only doc 1 is stable; doc 2 must not survive via checkpoint.
            let ckpt_ts = engine.checkpoint().unwrap();
            assert_eq!(ckpt_ts, ts(1));
        }
        let engine = StorageEngine::open(dir.path(), StorageConfig::default()).unwrap();
        assert_eq!(engine.stable_timestamp(), ts(1));
        assert_eq!(engine.count_at(&ns, ts(10)).unwrap(), 1);
        assert!(engine.collection_uuid(&ns).is_some());
    }

    #[test]
    fn reopen_falls_back_past_corrupt_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let ns = test_ns();
        {
            let engine = StorageEngine::open(dir.path(), StorageConfig::default()).unwrap();
            engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
            engine.set_stable_timestamp(ts(1));
            engine.checkpoint().unwrap();
            engine.insert_at(&ns, doc(2, 0), ts(2), true).unwrap();
            engine.set_stable_timestamp(ts(2));
            engine.checkpoint().unwrap();
        }
        // Damage the newest checkpoint.
        let newest = dir.path().join("checkpoint-0000000002-0000000000.ckpt");
        let mut bytes = std::fs::read(&newest).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&newest, &bytes).unwrap();

        let engine = StorageEngine::open(dir.path(), StorageConfig::default()).unwrap();
        assert_eq!(engine.stable_timestamp(), ts(1));
        assert_eq!(engine.count_at(&ns, ts(10)).unwrap(), 1);
    }

    #[test]
    fn collection_uuid_stable_across_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let ns = test_ns();
        let uuid = {
            let engine = StorageEngine::open(dir.path(), StorageConfig::default()).unwrap();
            let uuid = engine.create_collection(&ns);
            engine.insert_at(&ns, doc(1, 0), ts(1), true).unwrap();
            engine.set_stable_timestamp(ts(1));
            engine.checkpoint().unwrap();
            uuid
        };
        let engine = StorageEngine::open(dir.path(), StorageConfig::default()).unwrap();
        assert_eq!(engine.collection_uuid(&ns), Some(uuid));
    }
}
