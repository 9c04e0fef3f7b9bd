//! Replica set: one primary, N secondaries
//!
//! The in-process replica set keeps every member's storage engine and
//! oplog in one structure and replicates synchronously: a primary write
//! appends to the primary oplog, applies locally, then fans out to every
//! member whose replication is not paused. Tests pause replication to
//! create lag, which is how majority-commit and rollback behavior gets
//! exercised (the ReplSetTest idiom, in-process).
//!
//! Commit point: the highest optime replicated to a strict majority of
//! members. Its timestamp becomes the stable timestamp of every member's
//! storage engine. The stable timestamp never regresses.

use crate::oplog::{CommandKind, EntryBody, OpKind, Oplog, OplogEntry};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{
    ClusterTime, Error, NamespaceId, OpTime, ReplConfig, Result, StorageConfig,
};
use tessera_storage::{with_write_conflict_retry, StorageEngine, WriteBatch, WriteOp};
use tracing::{debug, info, warn};

/// Member role within the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Primary,
    Secondary,
    Recovering,
}

/// How many members must hold a write before it is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    /// Primary only
    Local,
    /// Strict majority of the member set
    Majority,
    /// Fixed member count
    Nodes(u32),
}

struct Member {
    engine: Arc<StorageEngine>,
    oplog: Arc<Oplog>,
    last_applied: OpTime,
    role: MemberRole,
    replication_paused: bool,
}

/// An in-process replica set
pub struct ReplicaSet {
    name: String,
    members: RwLock<Vec<Member>>,
    term: AtomicU64,
    clock: Mutex<ClusterTime>,
    config: ReplConfig,
    storage: StorageConfig,
}

impl ReplicaSet {
    /// In-memory replica set with `member_count` members; member 0 starts
    /// as primary in term 1.
    pub fn new(name: &str, member_count: usize, storage: StorageConfig, config: ReplConfig) -> Self {
        assert!(member_count >= 1, "a replica set needs at least one member");
        let members = (0..member_count)
            .map(|i| Member {
                engine: Arc::new(StorageEngine::new(storage.clone())),
                oplog: Arc::new(Oplog::new()),
                last_applied: OpTime::ZERO,
                role: if i == 0 {
                    MemberRole::Primary
                } else {
                    MemberRole::Secondary
                },
                replication_paused: false,
            })
            .collect();
        Self {
            name: name.to_string(),
            members: RwLock::new(members),
            term: AtomicU64::new(1),
            clock: Mutex::new(ClusterTime::ZERO),
            config,
            storage,
        }
    }

    /// Durable replica set rooted at `dir`, one subdirectory per member.
    /// Each member recovers independently (checkpoint + oplog replay).
    pub fn open(
        name: &str,
        dir: &Path,
        member_count: usize,
        storage: StorageConfig,
        config: ReplConfig,
    ) -> Result<Self> {
        assert!(member_count >= 1);
        let mut members = Vec::with_capacity(member_count);
        let mut max_term = 1;
        for i in 0..member_count {
            let member_dir = dir.join(format!("node{i}"));
            let (engine, oplog, last_applied) =
                crate::recovery::recover_node(&member_dir, storage.clone())?;
            max_term = max_term.max(last_applied.term);
            members.push(Member {
                engine: Arc::new(engine),
                oplog: Arc::new(oplog),
                last_applied,
                role: if i == 0 {
                    MemberRole::Primary
                } else {
                    MemberRole::Secondary
                },
                replication_paused: false,
            });
        }
        let clock = members
            .iter()
            .map(|m| m.last_applied.ts)
            .max()
            .unwrap_or(ClusterTime::ZERO);
        let set = Self {
            name: name.to_string(),
            members: RwLock::new(members),
            term: AtomicU64::new(max_term),
            clock: Mutex::new(clock),
            config,
            storage,
        };
        set.advance_commit_point();
        Ok(set)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub fn term(&self) -> u64 {
        self.term.load(Ordering::SeqCst)
    }

    pub fn primary_index(&self) -> usize {
        self.members
            .read()
            .iter()
            .position(|m| m.role == MemberRole::Primary)
            .expect("replica set always has a primary")
    }

    pub fn engine(&self, index: usize) -> Arc<StorageEngine> {
        self.members.read()[index].engine.clone()
    }

    pub fn primary_engine(&self) -> Arc<StorageEngine> {
        self.engine(self.primary_index())
    }

    pub fn oplog(&self, index: usize) -> Arc<Oplog> {
        self.members.read()[index].oplog.clone()
    }

    pub fn primary_oplog(&self) -> Arc<Oplog> {
        self.oplog(self.primary_index())
    }

    pub fn last_applied(&self, index: usize) -> OpTime {
        self.members.read()[index].last_applied
    }

    fn tick(&self) -> ClusterTime {
        let mut clock = self.clock.lock();
        *clock = clock.next_tick();
        *clock
    }

    /// Lift this set's logical clock to at least `ts`.
    ///
    /// Cluster-time gossip: a router (or migration coordinator) that has
    /// seen time `ts` elsewhere reports it before writing here, so entries
    /// on this set stamp above everything that causally preceded them.
    pub fn observe_cluster_time(&self, ts: ClusterTime) {
        let mut clock = self.clock.lock();
        if ts > *clock {
            *clock = ts;
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Replicate a batch of operations through the primary.
    ///
    /// Assigns optimes, appends to the primary oplog, applies locally,
    /// fans out to non-paused members, advances the commit point, then
    /// enforces the write concern.
    pub fn write(&self, bodies: Vec<EntryBody>, concern: WriteConcern) -> Result<OpTime> {
        if bodies.is_empty() {
            return Err(Error::InvalidOperation("empty replicated write".into()));
        }
        let term = self.term();
        let primary_idx = self.primary_index();

        // Uniqueness validated before anything reaches the oplog, so a
        // failed insert leaves no trace.
        {
            let members = self.members.read();
            let primary = &members[primary_idx];
            for body in &bodies {
                if let OpKind::Insert { doc } = &body.op {
                    let id = doc.id();
                    if primary.engine.is_live(&body.ns, &id) {
                        return Err(Error::DuplicateKey(id));
                    }
                }
            }
        }

        let entries: Vec<OplogEntry> = bodies
            .into_iter()
            .map(|body| OplogEntry {
                optime: OpTime::new(term, self.tick()),
                wall: Utc::now(),
                ns: body.ns,
                ui: body.ui,
                op: body.op,
                from_migrate: body.from_migrate,
                session: body.session,
            })
            .collect();
        let last_optime = entries.last().expect("non-empty batch").optime;

        {
            let mut members = self.members.write();
            let primary = &mut members[primary_idx];
            primary.oplog.append(&entries)?;
            let read_ts = primary.last_applied.ts;
            for entry in &entries {
                apply_on_primary(&primary.engine, entry, read_ts, &self.storage)?;
            }
            primary.last_applied = last_optime;

            for (i, member) in members.iter_mut().enumerate() {
                if i == primary_idx || member.replication_paused {
                    continue;
                }
                member.oplog.append(&entries)?;
                for entry in &entries {
                    apply_entry(&member.engine, entry)?;
                }
                member.last_applied = last_optime;
            }
        }

        self.advance_commit_point();
        self.await_write_concern(last_optime, concern)?;
        Ok(last_optime)
    }

    /// Check a write concern against current member positions.
    pub fn await_write_concern(&self, optime: OpTime, concern: WriteConcern) -> Result<()> {
        let members = self.members.read();
        let holding = members
            .iter()
            .filter(|m| m.last_applied.ts >= optime.ts)
            .count();
        let needed = match concern {
            WriteConcern::Local => 1,
            WriteConcern::Majority => members.len() / 2 + 1,
            WriteConcern::Nodes(n) => n as usize,
        };
        if holding >= needed {
            Ok(())
        } else {
            Err(Error::WriteConcernFailed(format!(
                "{holding} of {needed} required members hold {optime}"
            )))
        }
    }

    // ------------------------------------------------------------------
    // Replication control (test scaffolding surface)
    // ------------------------------------------------------------------

    /// Stop replicating new writes to a member. The member keeps serving
    /// reads at its (stale) last applied time.
    pub fn pause_replication(&self, index: usize) {
        let mut members = self.members.write();
        assert!(members[index].role != MemberRole::Primary, "cannot pause the primary");
        members[index].replication_paused = true;
        debug!(member = index, "replication paused");
    }

    /// Resume replication and catch the member up from the primary oplog.
    pub fn resume_replication(&self, index: usize) -> Result<()> {
        let primary_idx = self.primary_index();
        let mut members = self.members.write();
        members[index].replication_paused = false;
        let backlog = members[primary_idx]
            .oplog
            .entries_after(members[index].last_applied.ts);
        if !backlog.is_empty() {
            let member = &mut members[index];
            member.oplog.append(&backlog)?;
            for entry in &backlog {
                apply_entry(&member.engine, entry)?;
            }
            member.last_applied = backlog.last().expect("non-empty").optime;
        }
        drop(members);
        self.advance_commit_point();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit point / stable timestamp
    // ------------------------------------------------------------------

    /// Highest optime held by a strict majority.
    pub fn majority_commit_point(&self) -> OpTime {
        let members = self.members.read();
        let mut positions: Vec<OpTime> = members.iter().map(|m| m.last_applied).collect();
        positions.sort();
        positions.reverse();
        let majority = members.len() / 2 + 1;
        positions[majority - 1]
    }

    /// Recompute the commit point and push the stable timestamp into every
    /// member's storage.
    pub fn advance_commit_point(&self) -> OpTime {
        let commit = self.majority_commit_point();
        let members = self.members.read();
        for member in members.iter() {
            member.engine.set_stable_timestamp(commit.ts);
        }
        commit
    }

    /// Trim member oplogs below `floor` (never past the stable timestamp,
    /// always retaining the configured entry count).
    pub fn trim_oplogs(&self, floor: ClusterTime) {
        let stable = self.majority_commit_point().ts;
        let members = self.members.read();
        for member in members.iter() {
            member
                .oplog
                .trim_below(floor, stable, self.config.oplog_retention_entries);
        }
    }

    // ------------------------------------------------------------------
    // Elections
    // ------------------------------------------------------------------

    /// Force-elect a member, as a driving test harness does.
    ///
    /// Increments the term. Members that diverge above the new primary's
    /// last applied entry (possible when the old primary accepted writes a
    /// majority never saw) roll back to the stable timestamp and truncate
    /// their oplogs to match the new primary.
    pub fn step_up(&self, index: usize) -> Result<()> {
        let new_term = self.term.fetch_add(1, Ordering::SeqCst) + 1;
        let mut members = self.members.write();
        if members[index].replication_paused {
            members[index].replication_paused = false;
        }
        let new_primary_last = members[index].last_applied;

        for (i, member) in members.iter_mut().enumerate() {
            if i == index {
                member.role = MemberRole::Primary;
                continue;
            }
            member.role = MemberRole::Secondary;
            if member.last_applied.ts > new_primary_last.ts {
                warn!(
                    member = i,
                    diverged_at = %member.last_applied,
                    new_primary_last = %new_primary_last,
                    "rolling back diverged member"
                );
                member.role = MemberRole::Recovering;
                member.oplog.truncate_after(new_primary_last.ts)?;
                let stable = member.engine.rollback_to_stable();
                // Reapply retained entries above the stable timestamp.
                for entry in member.oplog.entries_after(stable) {
                    apply_entry(&member.engine, &entry)?;
                }
                member.last_applied = member
                    .oplog
                    .last_optime()
                    .unwrap_or(OpTime::ZERO)
                    .min(new_primary_last);
                member.role = MemberRole::Secondary;
            }
        }
        // The new primary's clock must dominate everything it will stamp.
        let mut clock = self.clock.lock();
        if new_primary_last.ts > *clock {
            *clock = new_primary_last.ts;
        }
        drop(clock);
        info!(member = index, term = new_term, set = %self.name, "stepped up");
        Ok(())
    }
}

/// Apply one oplog entry to a storage engine at its recorded timestamp.
///
/// Idempotent: re-applying an entry installs the same version at the same
/// timestamp, which replaces rather than duplicates.
pub(crate) fn apply_entry(engine: &StorageEngine, entry: &OplogEntry) -> Result<()> {
    let ts = entry.optime.ts;
    match &entry.op {
        OpKind::Insert { doc } => {
            // First write to a collection creates it; the entry's UUID
            // keeps identity consistent across members.
            engine.create_collection_with_uuid(&entry.ns, entry.ui);
            engine.insert_at(&entry.ns, doc.clone(), ts, false)
        }
        OpKind::Update { post, .. } => {
            // The collection may not exist yet on a member that joined
            // late; updates create it like inserts do.
            engine.create_collection_with_uuid(&entry.ns, entry.ui);
            engine.update_at(&entry.ns, post.clone(), ts)
        }
        OpKind::Delete { id, .. } => {
            engine.create_collection_with_uuid(&entry.ns, entry.ui);
            engine.delete_at(&entry.ns, id, ts)
        }
        OpKind::Command { command } => {
            match command {
                CommandKind::CreateCollection => {
                    engine.create_collection_with_uuid(&entry.ns, entry.ui);
                }
                CommandKind::DropCollection => {
                    // Dropping a collection that never reached this member
                    // is a no-op, not an error, during replay.
                    let _ = engine.drop_collection(&entry.ns);
                }
            }
            Ok(())
        }
        OpKind::Noop { .. } => Ok(()),
    }
}

/// Apply a fresh entry on the primary through a conflict-checked batch.
///
/// Data ops commit through a `WriteBatch` anchored at the primary's
/// position before this write, so first-committer-wins validation (and
/// the `storage-write-conflict` failpoint) runs on every routed write;
/// the bounded retry loop absorbs transient conflicts. Replay paths
/// (catch-up, rollback, recovery) keep using `apply_entry`, which is
/// idempotent and validates nothing.
fn apply_on_primary(
    engine: &StorageEngine,
    entry: &OplogEntry,
    read_ts: ClusterTime,
    storage: &StorageConfig,
) -> Result<()> {
    let op = match &entry.op {
        OpKind::Insert { doc } => WriteOp::Insert(doc.clone()),
        OpKind::Update { post, .. } => WriteOp::Update(post.clone()),
        OpKind::Delete { id, .. } => WriteOp::Delete(id.clone()),
        OpKind::Command { .. } | OpKind::Noop { .. } => {
            return apply_entry(engine, entry);
        }
    };
    engine.create_collection_with_uuid(&entry.ns, entry.ui);
    with_write_conflict_retry(storage, || {
        let mut batch = WriteBatch::new(read_ts);
        batch.push(entry.ns.clone(), op.clone());
        batch.commit(engine, entry.optime.ts).map(|_| ())
    })
}

/// Convenience constructor for replicated DDL bodies.
pub fn command_body(ns: NamespaceId, ui: uuid::Uuid, command: CommandKind) -> EntryBody {
    EntryBody {
        ns,
        ui,
        op: OpKind::Command { command },
        from_migrate: false,
        session: None,
    }
}
