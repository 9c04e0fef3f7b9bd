//! Stream cursors
//!
//! `ChangeStream` polls one replica set's primary oplog and translates
//! entries at or below the majority commit point into events. Nothing is
//! emitted before it is majority committed, so an event can never be
//! rolled back out from under a consumer.
//!
//! `ClusterChangeStream` runs one cursor per shard and merges their
//! batches in resume-token order.

use std::sync::Arc;

use tessera_core::{ClusterTime, Error, FeatureCompatibility, NamespaceId, Result};
use tessera_repl::{CommandKind, OpKind, OplogEntry, ReplicaSet};
use tracing::debug;

use crate::event::{ChangeEvent, EventKind, UpdateDescription};
use crate::token::ResumeToken;

/// What slice of the cluster a stream watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamScope {
    Collection(NamespaceId),
    Database(String),
    Cluster,
}

impl StreamScope {
    fn matches(&self, ns: &NamespaceId) -> bool {
        match self {
            StreamScope::Collection(watched) => watched == ns,
            StreamScope::Database(db) => &ns.db == db,
            StreamScope::Cluster => true,
        }
    }
}

/// Cursor over one replica set's committed oplog.
pub struct ChangeStream {
    set: Arc<ReplicaSet>,
    scope: StreamScope,
    fcv: FeatureCompatibility,
    /// Entries at or below this timestamp have been examined.
    position: ClusterTime,
    /// Resume boundary: events with tokens at or below this are not
    /// re-emitted. Needed beyond `position` because two shards can hold
    /// entries at the same cluster time.
    after: Option<ResumeToken>,
    invalidated: bool,
}

impl ChangeStream {
    /// Open a stream that sees writes committed after this call.
    pub fn open(set: Arc<ReplicaSet>, scope: StreamScope, fcv: FeatureCompatibility) -> Self {
        let position = set.majority_commit_point().ts;
        Self {
            set,
            scope,
            fcv,
            position,
            after: None,
            invalidated: false,
        }
    }

    /// Reopen strictly after `token`.
    ///
    /// Fails with `ChangeStreamHistoryLost` when the oplog no longer
    /// retains the token's position.
    pub fn resume_after(
        set: Arc<ReplicaSet>,
        scope: StreamScope,
        fcv: FeatureCompatibility,
        token: ResumeToken,
    ) -> Result<Self> {
        if !set.primary_oplog().covers(token.cluster_time) {
            return Err(Error::ChangeStreamHistoryLost);
        }
        // Rewind below the token's timestamp; entries sharing it are
        // re-examined and filtered by the token comparison instead.
        let position = just_before(token.cluster_time);
        debug!(token = %token, "change stream resumed");
        Ok(Self {
            set,
            scope,
            fcv,
            position,
            after: Some(token),
            invalidated: false,
        })
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Drain every committed event past the cursor position.
    pub fn next_batch(&mut self) -> Result<Vec<ChangeEvent>> {
        if self.invalidated {
            return Ok(Vec::new());
        }
        let commit_ts = self.set.majority_commit_point().ts;
        let entries = self
            .set
            .primary_oplog()
            .entries_between(self.position, commit_ts);
        let mut events = Vec::new();
        for entry in entries {
            self.position = entry.optime.ts;
            let Some(event) = self.translate(&entry) else {
                continue;
            };
            if let Some(after) = &self.after {
                if event.token <= *after {
                    continue;
                }
            }
            let drop_event = event.kind == EventKind::Drop;
            events.push(event);
            if drop_event && matches!(self.scope, StreamScope::Collection(_)) {
                self.invalidated = true;
                break;
            }
        }
        Ok(events)
    }

    fn translate(&self, entry: &OplogEntry) -> Option<ChangeEvent> {
        if entry.from_migrate || !self.scope.matches(&entry.ns) {
            return None;
        }
        let ts = entry.optime.ts;
        let (kind, id, full_doc, update_desc, pre_image, dropped_uuid) = match &entry.op {
            OpKind::Insert { doc } => (
                EventKind::Insert,
                Some(doc.id()),
                Some(doc.clone()),
                None,
                None,
                None,
            ),
            OpKind::Update { post, pre } => (
                EventKind::Update,
                Some(post.id()),
                Some(post.clone()),
                pre.as_ref().map(|p| UpdateDescription::diff(p, post)),
                pre.clone(),
                None,
            ),
            OpKind::Delete { id, pre } => {
                (EventKind::Delete, Some(id.clone()), None, None, pre.clone(), None)
            }
            OpKind::Command { command } => match command {
                CommandKind::DropCollection => {
                    let dropped = match self.fcv {
                        FeatureCompatibility::Current => Some(entry.ui),
                        FeatureCompatibility::Legacy => None,
                    };
                    (EventKind::Drop, None, None, None, None, dropped)
                }
                CommandKind::CreateCollection => return None,
            },
            OpKind::Noop { .. } => return None,
        };
        Some(ChangeEvent {
            kind,
            ns: entry.ns.clone(),
            id: id.clone(),
            full_doc,
            update_desc,
            pre_image,
            dropped_uuid,
            cluster_time: ts,
            token: ResumeToken::new(ts, entry.ui, id),
        })
    }
}

/// Merged feed over every shard of a cluster.
pub struct ClusterChangeStream {
    streams: Vec<ChangeStream>,
}

impl ClusterChangeStream {
    pub fn open(sets: Vec<Arc<ReplicaSet>>, scope: StreamScope, fcv: FeatureCompatibility) -> Self {
        let streams = sets
            .into_iter()
            .map(|set| ChangeStream::open(set, scope.clone(), fcv))
            .collect();
        Self { streams }
    }

    /// Resume every shard's cursor strictly after `token`.
    pub fn resume_after(
        sets: Vec<Arc<ReplicaSet>>,
        scope: StreamScope,
        fcv: FeatureCompatibility,
        token: ResumeToken,
    ) -> Result<Self> {
        let mut streams = Vec::with_capacity(sets.len());
        for set in sets {
            streams.push(ChangeStream::resume_after(
                set,
                scope.clone(),
                fcv,
                token.clone(),
            )?);
        }
        Ok(Self { streams })
    }

    /// Committed events from every shard, in token order.
    pub fn next_batch(&mut self) -> Result<Vec<ChangeEvent>> {
        let mut events = Vec::new();
        for stream in &mut self.streams {
            events.extend(stream.next_batch()?);
        }
        events.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(events)
    }
}

/// The largest ClusterTime strictly below `ts` (saturating at zero).
fn just_before(ts: ClusterTime) -> ClusterTime {
    if ts.inc > 0 {
        ClusterTime::new(ts.secs, ts.inc - 1)
    } else if ts.secs > 0 {
        ClusterTime::new(ts.secs - 1, u32::MAX)
    } else {
        ClusterTime::ZERO
    }
}
