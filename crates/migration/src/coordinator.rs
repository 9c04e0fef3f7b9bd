//! Migration coordinator
//!
//! Runs the donor side of a chunk move. The stages mirror the wire
//! protocol of a real donor/recipient pair, collapsed into direct calls
//! because both shards live in this process:
//!
//! 1. register the migration (one per collection at a time)
//! 2. clone a snapshot of the chunk's documents to the recipient
//! 3. catch up: replay donor writes that landed during the clone
//! 4. transfer retryable-write session history
//! 5. critical section: block donor writes to the range, drain the tail
//! 6. commit the routing change in the config catalog
//! 7. delete the moved range from the donor
//!
//! Recipient-side writes and the donor-side range deletion are tagged
//! `from_migrate`. A failure before commit tears down everything the
//! migration wrote on the recipient and leaves routing untouched.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tessera_core::failpoint;
use tessera_core::{
    BalancerConfig, ChunkRange, ClusterTime, Error, NamespaceId, Result, ShardId, ShardKey,
    ShardKeyPattern, ShardVersion,
};
use tessera_repl::{
    EntryBody, OpKind, OplogEntry, ReplicaSet, SessionInfo, SessionRegistry, WriteConcern,
};
use tessera_router::{ConfigCatalog, ShardVersionGate};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    FP_MIGRATION_ABORT_BEFORE_COMMIT, FP_MIGRATION_BEFORE_CRITICAL_SECTION,
    FP_MIGRATION_IN_CRITICAL_SECTION, FP_MIGRATION_PAUSE_AFTER_CLONE,
};

const PAUSE_POLL: Duration = Duration::from_millis(2);

/// Everything the coordinator needs from one shard.
#[derive(Clone)]
pub struct ShardHandle {
    pub id: ShardId,
    pub set: Arc<ReplicaSet>,
    pub gate: Arc<ShardVersionGate>,
    pub sessions: Arc<SessionRegistry>,
}

impl ShardHandle {
    pub fn new(id: ShardId, set: Arc<ReplicaSet>) -> Self {
        Self {
            id,
            set,
            gate: Arc::new(ShardVersionGate::new()),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}

/// Donor-side chunk migration driver.
#[derive(Default)]
pub struct MigrationCoordinator {
    config: BalancerConfig,
    active: Mutex<HashMap<NamespaceId, ChunkRange>>,
    critical: Mutex<HashMap<NamespaceId, ChunkRange>>,
}

impl MigrationCoordinator {
    pub fn new(config: BalancerConfig) -> Self {
        Self {
            config,
            active: Mutex::new(HashMap::new()),
            critical: Mutex::new(HashMap::new()),
        }
    }

    /// True while a migration for `ns` is running.
    pub fn migration_in_progress(&self, ns: &NamespaceId) -> bool {
        self.active.lock().contains_key(ns)
    }

    /// True while `key` falls in a range whose donor critical section is
    /// open. The write path rejects such writes instead of queueing them.
    pub fn write_blocked(&self, ns: &NamespaceId, key: &ShardKey) -> bool {
        self.critical
            .lock()
            .get(ns)
            .map(|range| range.contains(key))
            .unwrap_or(false)
    }

    /// Move the chunk covering exactly `range` from `donor` to `recipient`.
    ///
    /// Returns the recipient's shard version after the commit. On any error
    /// before the commit the recipient is scrubbed of everything this
    /// migration wrote and routing is unchanged.
    pub fn move_chunk(
        &self,
        catalog: &ConfigCatalog,
        ns: &NamespaceId,
        range: &ChunkRange,
        donor: &ShardHandle,
        recipient: &ShardHandle,
    ) -> Result<ShardVersion> {
        if donor.id == recipient.id {
            return Err(Error::InvalidOperation(format!(
                "cannot move a chunk from {} to itself",
                donor.id
            )));
        }

        // Stage 1: register. One migration per collection.
        {
            let mut active = self.active.lock();
            if active.contains_key(ns) {
                return Err(Error::MigrationConflict(
                    ns.clone(),
                    "another migration is already running".into(),
                ));
            }
            active.insert(ns.clone(), range.clone());
        }
        info!(ns = %ns, from = %donor.id, to = %recipient.id, "migration started");

        let outcome = self.run_stages(catalog, ns, range, donor, recipient);

        self.critical.lock().remove(ns);
        self.active.lock().remove(ns);

        match &outcome {
            Ok(version) => info!(ns = %ns, to = %recipient.id, version = %version, "migration committed"),
            Err(err) => {
                warn!(ns = %ns, error = %err, "migration aborted");
                if let Ok(routing) = catalog.routing(ns) {
                    if let Err(cleanup_err) =
                        self.scrub_recipient(ns, range, &routing.pattern, recipient)
                    {
                        warn!(ns = %ns, error = %cleanup_err, "recipient scrub failed after abort");
                    }
                }
            }
        }
        outcome
    }

    fn run_stages(
        &self,
        catalog: &ConfigCatalog,
        ns: &NamespaceId,
        range: &ChunkRange,
        donor: &ShardHandle,
        recipient: &ShardHandle,
    ) -> Result<ShardVersion> {
        let routing = catalog.routing(ns)?;
        let pattern = routing.pattern.clone();
        let chunk = routing
            .chunks
            .chunks()
            .iter()
            .find(|c| c.range == *range)
            .ok_or_else(|| {
                Error::InvalidOperation(format!("no chunk with range {range:?} in {ns}"))
            })?;
        if chunk.shard != donor.id {
            return Err(Error::InvalidOperation(format!(
                "chunk is owned by {}, not {}",
                chunk.shard, donor.id
            )));
        }

        let ui = donor
            .set
            .primary_engine()
            .collection_uuid(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))?;

        // Stage 2: snapshot clone. The recipient's clock observes the
        // donor's first, so everything it stamps from here on orders
        // after the donor history being copied.
        let clone_ts = donor.set.last_applied(donor.set.primary_index()).ts;
        recipient.set.observe_cluster_time(clone_ts);
        let cloned = self.clone_range(ns, ui, range, &pattern, clone_ts, donor, recipient)?;
        debug!(ns = %ns, documents = cloned, "clone finished");

        while failpoint::is_active(FP_MIGRATION_PAUSE_AFTER_CLONE) {
            thread::sleep(PAUSE_POLL);
        }

        // Stage 3: catch up on writes that landed during the clone.
        let transferred_up_to =
            self.transfer_mods(ns, ui, range, &pattern, clone_ts, donor, recipient)?;

        // Stage 4: session history rides over as no-op entries so it
        // survives recipient recovery, then lands in its registry.
        self.transfer_sessions(ns, ui, donor, recipient)?;

        while failpoint::is_active(FP_MIGRATION_BEFORE_CRITICAL_SECTION) {
            thread::sleep(PAUSE_POLL);
        }

        // Stage 5: critical section. Donor writes to the range are rejected
        // from here until commit; drain whatever arrived since catch-up.
        self.critical.lock().insert(ns.clone(), range.clone());
        let entered = Instant::now();
        recipient
            .set
            .observe_cluster_time(donor.set.last_applied(donor.set.primary_index()).ts);
        self.transfer_mods(ns, ui, range, &pattern, transferred_up_to, donor, recipient)?;
        while failpoint::is_active(FP_MIGRATION_IN_CRITICAL_SECTION) {
            if entered.elapsed() > self.config.critical_section_timeout {
                return Err(Error::LockTimeout(format!(
                    "critical section for {ns} exceeded {:?}",
                    self.config.critical_section_timeout
                )));
            }
            thread::sleep(PAUSE_POLL);
        }

        if failpoint::hit(FP_MIGRATION_ABORT_BEFORE_COMMIT) {
            return Err(Error::InvalidOperation(
                "migration failpoint fired before commit".into(),
            ));
        }

        // Stage 6: commit. Routing flips, both gates move in lockstep.
        let recipient_version = catalog.commit_move(ns, range, recipient.id.clone())?;
        recipient.gate.set(ns.clone(), recipient_version);
        match catalog.routing(ns)?.chunks.shard_version(&donor.id) {
            Some(version) => donor.gate.set(ns.clone(), version),
            None => donor.gate.clear(ns),
        }
        self.critical.lock().remove(ns);

        // Stage 7: the donor no longer owns the range; delete its copy.
        // The commit already happened, so a failure here leaves orphaned
        // donor documents rather than unwinding the migration.
        if let Err(err) = self.delete_range(ns, ui, range, &pattern, donor) {
            warn!(ns = %ns, error = %err, "donor range deletion failed, orphans remain");
        }

        Ok(recipient_version)
    }

    /// Copy every document in `range`, as of `clone_ts`, to the recipient.
    fn clone_range(
        &self,
        ns: &NamespaceId,
        ui: Uuid,
        range: &ChunkRange,
        pattern: &ShardKeyPattern,
        clone_ts: ClusterTime,
        donor: &ShardHandle,
        recipient: &ShardHandle,
    ) -> Result<usize> {
        let docs = donor.set.primary_engine().scan_at(ns, clone_ts)?;
        let mut in_range = Vec::new();
        for doc in docs {
            if range.contains(&pattern.extract(&doc)?) {
                in_range.push(doc);
            }
        }
        let total = in_range.len();
        for batch in in_range.chunks(self.config.clone_batch_size) {
            let bodies = batch
                .iter()
                .map(|doc| EntryBody {
                    ns: ns.clone(),
                    ui,
                    op: OpKind::Insert { doc: doc.clone() },
                    from_migrate: true,
                    session: None,
                })
                .collect();
            recipient.set.write(bodies, WriteConcern::Majority)?;
        }
        Ok(total)
    }

    /// Replay donor writes in `range` with timestamps above `after` onto
    /// the recipient. Returns the donor optime drained up to.
    fn transfer_mods(
        &self,
        ns: &NamespaceId,
        ui: Uuid,
        range: &ChunkRange,
        pattern: &ShardKeyPattern,
        after: ClusterTime,
        donor: &ShardHandle,
        recipient: &ShardHandle,
    ) -> Result<ClusterTime> {
        let mut drained_to = after;
        loop {
            let entries = donor.set.primary_oplog().entries_after(drained_to);
            let Some(last) = entries.last() else {
                return Ok(drained_to);
            };
            drained_to = last.optime.ts;

            let mut bodies = Vec::new();
            for entry in &entries {
                if entry.ns != *ns || entry.from_migrate || !entry.is_data_op() {
                    continue;
                }
                if let Some(key) = entry_shard_key(entry, pattern) {
                    if !range.contains(&key) {
                        continue;
                    }
                }
                bodies.push(EntryBody {
                    ns: ns.clone(),
                    ui,
                    op: recipient_op(entry, recipient),
                    from_migrate: true,
                    session: entry.session,
                });
            }
            if !bodies.is_empty() {
                recipient.set.write(bodies, WriteConcern::Majority)?;
            }
        }
    }

    fn transfer_sessions(
        &self,
        ns: &NamespaceId,
        ui: Uuid,
        donor: &ShardHandle,
        recipient: &ShardHandle,
    ) -> Result<()> {
        let history = donor.sessions.export();
        if history.is_empty() {
            return Ok(());
        }
        let bodies = history
            .iter()
            .map(|entry| EntryBody {
                ns: ns.clone(),
                ui,
                op: OpKind::Noop {
                    payload: entry.result.clone(),
                },
                from_migrate: true,
                session: Some(SessionInfo {
                    lsid: entry.lsid,
                    txn_number: entry.txn_number,
                    stmt_id: entry.stmt_id,
                }),
            })
            .collect();
        recipient.set.write(bodies, WriteConcern::Majority)?;
        recipient.sessions.import(history);
        Ok(())
    }

    /// Delete every document in `range` from `shard`, tagged `from_migrate`.
    fn delete_range(
        &self,
        ns: &NamespaceId,
        ui: Uuid,
        range: &ChunkRange,
        pattern: &ShardKeyPattern,
        shard: &ShardHandle,
    ) -> Result<()> {
        let engine = shard.set.primary_engine();
        let read_ts = shard.set.last_applied(shard.set.primary_index()).ts;
        let docs = engine.scan_at(ns, read_ts)?;
        let mut bodies = Vec::new();
        for doc in docs {
            if range.contains(&pattern.extract(&doc)?) {
                bodies.push(EntryBody {
                    ns: ns.clone(),
                    ui,
                    op: OpKind::Delete {
                        id: doc.id(),
                        pre: None,
                    },
                    from_migrate: true,
                    session: None,
                });
            }
        }
        for batch in bodies.chunks(self.config.clone_batch_size) {
            shard.set.write(batch.to_vec(), WriteConcern::Majority)?;
        }
        Ok(())
    }

    /// Abort path: remove what the migration put on the recipient. Only
    /// documents inside the aborted range go, the recipient may own other
    /// chunks of the same collection.
    fn scrub_recipient(
        &self,
        ns: &NamespaceId,
        range: &ChunkRange,
        pattern: &ShardKeyPattern,
        recipient: &ShardHandle,
    ) -> Result<()> {
        let engine = recipient.set.primary_engine();
        let Some(ui) = engine.collection_uuid(ns) else {
            return Ok(());
        };
        self.delete_range(ns, ui, range, pattern, recipient)
    }
}

/// Shard key of the document an oplog entry touches, where recoverable.
fn entry_shard_key(entry: &OplogEntry, pattern: &ShardKeyPattern) -> Option<ShardKey> {
    match &entry.op {
        OpKind::Insert { doc } => pattern.extract(doc).ok(),
        OpKind::Update { post, .. } => pattern.extract(post).ok(),
        OpKind::Delete { id, pre } => match pre {
            Some(doc) => pattern.extract(doc).ok(),
            // An id-keyed collection can recover the key from the id.
            None if pattern.fields.len() == 1 && pattern.fields[0] == "_id" => {
                Some(ShardKey(vec![id.0.clone()]))
            }
            // Unknown key: the caller transfers the delete regardless, a
            // tombstone for a document the recipient never held is inert.
            None => None,
        },
        OpKind::Command { .. } | OpKind::Noop { .. } => None,
    }
}

/// Translate a donor entry into the op the recipient applies.
///
/// A post-clone insert may race the clone itself; if the recipient already
/// holds the document the insert becomes an overwrite.
fn recipient_op(entry: &OplogEntry, recipient: &ShardHandle) -> OpKind {
    match &entry.op {
        OpKind::Insert { doc } => {
            if recipient
                .set
                .primary_engine()
                .is_live(&entry.ns, &doc.id())
            {
                OpKind::Update {
                    post: doc.clone(),
                    pre: None,
                }
            } else {
                OpKind::Insert { doc: doc.clone() }
            }
        }
        other => other.clone(),
    }
}
