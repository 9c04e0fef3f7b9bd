//! Record store: `_id` → version chain
//!
//! One `RecordStore` per collection. Each document id maps to a version
//! chain: `(commit_ts, Option<Document>)` pairs, newest first, where `None`
//! is a tombstone. Snapshot reads pick the newest version at or below the
//! read timestamp; tombstones make deletes visible without losing history.
//!
//! Chains are strictly decreasing in `commit_ts`. Writing two versions at
//! the same timestamp replaces rather than stacks, which keeps replay of an
//! oplog slice idempotent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::{ClusterTime, Document, DocumentId};

/// Timestamped versions of one document, newest first
///
/// `None` values are tombstones left by deletes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionChain {
    versions: Vec<(ClusterTime, Option<Document>)>,
}

impl VersionChain {
    /// Install a version at `ts`.
    ///
    /// Newer-than-everything is the normal append. An exact-`ts` rewrite
    /// replaces in place (idempotent replay). Out-of-order installs slot
    /// into position so a chain never violates its ordering.
    pub fn install(&mut self, ts: ClusterTime, doc: Option<Document>) {
        match self.versions.iter().position(|(t, _)| *t <= ts) {
            Some(idx) if self.versions[idx].0 == ts => self.versions[idx] = (ts, doc),
            Some(idx) => self.versions.insert(idx, (ts, doc)),
            None => self.versions.push((ts, doc)),
        }
    }

    /// The newest version with `commit_ts <= ts`, tombstones included.
    pub fn version_at(&self, ts: ClusterTime) -> Option<&(ClusterTime, Option<Document>)> {
        self.versions.iter().find(|(t, _)| *t <= ts)
    }

    /// The visible document at `ts` (tombstone ⇒ None).
    pub fn visible_at(&self, ts: ClusterTime) -> Option<&Document> {
        self.version_at(ts).and_then(|(_, doc)| doc.as_ref())
    }

    /// Timestamp of the newest version, if any.
    pub fn newest_ts(&self) -> Option<ClusterTime> {
        self.versions.first().map(|(t, _)| *t)
    }

    /// Drop versions with `commit_ts > stable`. Returns true if the chain
    /// is empty afterwards.
    pub fn rollback_to(&mut self, stable: ClusterTime) -> bool {
        self.versions.retain(|(t, _)| *t <= stable);
        self.versions.is_empty()
    }

    /// Discard history not needed to serve reads at or above `oldest`:
    /// everything strictly older than the newest version at or below
    /// `oldest`. Returns true if the chain is empty afterwards (a chain
    /// whose only remaining version would be an old tombstone is cleared).
    pub fn prune_below(&mut self, oldest: ClusterTime) -> bool {
        if let Some(idx) = self.versions.iter().position(|(t, _)| *t <= oldest) {
            self.versions.truncate(idx + 1);
            // A sole tombstone below the horizon carries no information.
            if idx == 0 && self.versions.len() == 1 && self.versions[0].1.is_none() {
                self.versions.clear();
            }
        }
        self.versions.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        self.versions.len()
    }
}

/// Ordered map of version chains for one collection
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RecordStore {
    records: BTreeMap<DocumentId, VersionChain>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a document version (insert or update) at `ts`.
    pub fn put(&mut self, id: DocumentId, doc: Document, ts: ClusterTime) {
        self.records.entry(id).or_default().install(ts, Some(doc));
    }

    /// Install a tombstone at `ts`.
    pub fn remove(&mut self, id: DocumentId, ts: ClusterTime) {
        self.records.entry(id).or_default().install(ts, None);
    }

    /// Visible document at `ts`.
    pub fn get_at(&self, id: &DocumentId, ts: ClusterTime) -> Option<&Document> {
        self.records.get(id).and_then(|chain| chain.visible_at(ts))
    }

    /// Newest committed timestamp for `id` regardless of visibility.
    /// Drives first-committer-wins validation.
    pub fn newest_ts(&self, id: &DocumentId) -> Option<ClusterTime> {
        self.records.get(id).and_then(|chain| chain.newest_ts())
    }

    /// All documents visible at `ts`, in id order.
    pub fn scan_at(&self, ts: ClusterTime) -> impl Iterator<Item = (&DocumentId, &Document)> {
        self.records
            .iter()
            .filter_map(move |(id, chain)| chain.visible_at(ts).map(|doc| (id, doc)))
    }

    /// Count of documents visible at `ts`.
    pub fn count_at(&self, ts: ClusterTime) -> usize {
        self.scan_at(ts).count()
    }

    /// Discard versions newer than `stable` across all chains.
    pub fn rollback_to(&mut self, stable: ClusterTime) {
        self.records.retain(|_, chain| !chain.rollback_to(stable));
    }

    /// Discard history below the oldest-read horizon.
    pub fn prune_below(&mut self, oldest: ClusterTime) {
        self.records.retain(|_, chain| !chain.prune_below(oldest));
    }

    /// Materialize the latest-visible state at `ts` (checkpoint payload).
    pub fn flattened_at(&self, ts: ClusterTime) -> Vec<(DocumentId, Document)> {
        self.scan_at(ts)
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    }
}
