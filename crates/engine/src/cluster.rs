//! The cluster: catalog, shards, router, and the command surface
//!
//! `Cluster` is the in-process equivalent of a sharded deployment: N
//! replica-set shards behind one config catalog and one routing cache.
//! Every data command routes by shard key through `with_stale_retry`,
//! presents its version stamp to the target shard's gate, and honors the
//! migration coordinator's critical sections. Collections must be
//! sharded before use; an unsharded write has nowhere to route.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use tessera_changestream::{ClusterChangeStream, ResumeToken, StreamScope};
use tessera_core::{
    BalancerConfig, ChunkRange, ClusterTime, Document, DocumentId, Error, FeatureCompatibility,
    NamespaceId, OpTime, PlannerConfig, ReplConfig, Result, ShardId, ShardKey, ShardKeyPattern,
    ShardVersion, StorageConfig,
};
use tessera_migration::{MigrationCoordinator, ShardHandle};
use tessera_planner::Filter;
use tessera_repl::{
    command_body, CommandKind, EntryBody, OpKind, ReplicaSet, SessionInfo, WriteConcern,
};
use tessera_router::{with_stale_retry, CollectionRouting, ConfigCatalog, RoutingCache};

use crate::shard::Shard;

/// Cluster topology and tuning
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub shard_count: usize,
    pub members_per_shard: usize,
    pub storage: StorageConfig,
    pub repl: ReplConfig,
    pub balancer: BalancerConfig,
    pub planner: PlannerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shard_count: 2,
            members_per_shard: 3,
            storage: StorageConfig::default(),
            repl: ReplConfig::default(),
            balancer: BalancerConfig::default(),
            planner: PlannerConfig::default(),
        }
    }
}

/// Outcome of a routed write: documents affected and the optime that
/// carries them. Recorded verbatim as the session's statement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub n: u64,
    pub optime: OpTime,
}

/// Which image `find_and_modify` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnImage {
    Pre,
    Post,
}

pub struct Cluster {
    catalog: Arc<ConfigCatalog>,
    shards: Vec<Shard>,
    router: RoutingCache,
    coordinator: MigrationCoordinator,
    fcv: RwLock<FeatureCompatibility>,
    pre_images: RwLock<HashSet<NamespaceId>>,
    /// Highest optime timestamp this router has seen on any shard.
    /// Gossiped to a shard before writing there, so cross-shard entries
    /// (and so resume tokens) are causally ordered.
    gossip: Mutex<ClusterTime>,
}

impl Cluster {
    pub fn new(config: ClusterConfig) -> Self {
        let catalog = Arc::new(ConfigCatalog::new());
        let mut shards = Vec::with_capacity(config.shard_count);
        for i in 0..config.shard_count {
            let name = format!("shard{i}");
            let id = ShardId::new(name.clone());
            catalog.add_shard(id.clone());
            let set = Arc::new(ReplicaSet::new(
                &name,
                config.members_per_shard,
                config.storage.clone(),
                config.repl.clone(),
            ));
            shards.push(Shard::new(ShardHandle::new(id, set), config.planner.clone()));
        }
        let router = RoutingCache::new(catalog.clone());
        info!(shards = config.shard_count, members = config.members_per_shard, "cluster started");
        Self {
            catalog,
            shards,
            router,
            coordinator: MigrationCoordinator::new(config.balancer.clone()),
            fcv: RwLock::new(FeatureCompatibility::default()),
            pre_images: RwLock::new(HashSet::new()),
            gossip: Mutex::new(ClusterTime::ZERO),
        }
    }

    pub fn catalog(&self) -> &Arc<ConfigCatalog> {
        &self.catalog
    }

    pub fn router(&self) -> &RoutingCache {
        &self.router
    }

    pub fn coordinator(&self) -> &MigrationCoordinator {
        &self.coordinator
    }

    pub fn shard(&self, index: usize) -> &Shard {
        &self.shards[index]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_named(&self, id: &ShardId) -> Result<&Shard> {
        self.shards
            .iter()
            .find(|s| &s.handle.id == id)
            .ok_or_else(|| Error::InvalidOperation(format!("unknown shard {id}")))
    }

    fn sets(&self) -> Vec<Arc<ReplicaSet>> {
        self.shards.iter().map(|s| s.set().clone()).collect()
    }

    // ---- DDL ----------------------------------------------------------

    /// Shard a collection: one full-range chunk on shard0, materialized
    /// there with the routing epoch as its collection UUID.
    pub fn shard_collection(&self, ns: &NamespaceId, pattern: ShardKeyPattern) -> Result<()> {
        let primary = &self.shards[0];
        let epoch = self
            .catalog
            .shard_collection(ns.clone(), pattern, primary.handle.id.clone())?;
        self.replicate(
            primary,
            command_body(ns.clone(), epoch, CommandKind::CreateCollection),
            WriteConcern::Majority,
        )?;
        let routing = self.catalog.routing(ns)?;
        primary
            .handle
            .gate
            .set(ns.clone(), stamp_for(&routing, &primary.handle.id));
        Ok(())
    }

    /// Drop the collection everywhere. The drop is replicated on every
    /// owning shard (change streams see it) before the routing dies.
    pub fn drop_collection(&self, ns: &NamespaceId) -> Result<()> {
        let routing = self.catalog.routing(ns)?;
        for shard in self.owning_shards(&routing)? {
            if let Some(ui) = shard.set().primary_engine().collection_uuid(ns) {
                self.replicate(
                    shard,
                    command_body(ns.clone(), ui, CommandKind::DropCollection),
                    WriteConcern::Majority,
                )?;
            }
            shard.handle.gate.clear(ns);
            shard.forget_collection(ns);
        }
        self.catalog.drop_collection(ns)?;
        self.router.invalidate(ns);
        info!(ns = %ns, "collection dropped");
        Ok(())
    }

    /// Build a single-field index on every owning shard, backfilled from
    /// the current primaries.
    pub fn create_index(&self, ns: &NamespaceId, field: &str) -> Result<()> {
        let routing = self.catalog.routing(ns)?;
        for shard in self.owning_shards(&routing)? {
            let docs = shard.snapshot(ns)?;
            shard.indexes(ns).create_index(field, &docs);
            shard.planner(ns).cache().invalidate_field(field);
        }
        Ok(())
    }

    pub fn drop_index(&self, ns: &NamespaceId, field: &str) -> Result<()> {
        let routing = self.catalog.routing(ns)?;
        for shard in self.owning_shards(&routing)? {
            shard.indexes(ns).drop_index(field);
            shard.planner(ns).cache().invalidate_field(field);
        }
        Ok(())
    }

    // ---- Topology -----------------------------------------------------

    /// Split the chunk containing `at`. Owning shards learn their new
    /// versions immediately; routers find out when their next stamped
    /// request bounces.
    pub fn split_chunk(&self, ns: &NamespaceId, at: &ShardKey) -> Result<()> {
        self.catalog.split_chunk(ns, at)?;
        let routing = self.catalog.routing(ns)?;
        for shard in self.owning_shards(&routing)? {
            shard
                .handle
                .gate
                .set(ns.clone(), stamp_for(&routing, &shard.handle.id));
        }
        Ok(())
    }

    /// Move one chunk to `to` through the migration coordinator, then
    /// rebuild planner state on both sides.
    pub fn move_chunk(&self, ns: &NamespaceId, range: &ChunkRange, to: &ShardId) -> Result<()> {
        let routing = self.catalog.routing(ns)?;
        let owners = routing.chunks.shards_for_range(range);
        let [(donor_id, _)] = owners.as_slice() else {
            return Err(Error::InvalidOperation(format!(
                "{range} does not map to a single donor shard"
            )));
        };
        let donor = self.shard_named(donor_id)?;
        let recipient = self.shard_named(to)?;
        self.coordinator
            .move_chunk(&self.catalog, ns, range, &donor.handle, &recipient.handle)?;
        let migrated_to = recipient
            .set()
            .last_applied(recipient.set().primary_index())
            .ts;
        let mut gossip = self.gossip.lock();
        if migrated_to > *gossip {
            *gossip = migrated_to;
        }
        drop(gossip);
        donor.rebuild_indexes(ns)?;
        recipient.rebuild_indexes(ns)?;
        self.router.refresh(ns)?;
        Ok(())
    }

    /// Elect `member` on one shard, then rebuild that shard's planner
    /// state from the new primary.
    pub fn step_up(&self, shard_index: usize, member: usize) -> Result<()> {
        let shard = &self.shards[shard_index];
        shard.set().step_up(member)?;
        for ns in shard.tracked_namespaces() {
            shard.rebuild_indexes(&ns)?;
        }
        Ok(())
    }

    // ---- Writes -------------------------------------------------------

    pub fn insert(
        &self,
        ns: &NamespaceId,
        doc: Document,
        concern: WriteConcern,
        session: Option<SessionInfo>,
    ) -> Result<WriteResult> {
        with_stale_retry(&self.router, ns, |routing| {
            if let Some(prior) = self.prior_result(routing, session)? {
                return decode_write_result(prior);
            }
            let key = routing.pattern.extract(&doc)?;
            let shard = self.target_shard(routing, ns, &key)?;
            let ui = self.collection_ui(shard, routing, ns);
            let optime = self.replicate(
                shard,
                EntryBody {
                    ns: ns.clone(),
                    ui,
                    op: OpKind::Insert { doc: doc.clone() },
                    from_migrate: false,
                    session,
                },
                concern,
            )?;
            shard.indexes(ns).on_write(&doc);
            let result = WriteResult { n: 1, optime };
            self.record_session(shard, session, &result);
            Ok(result)
        })
    }

    /// Replace the document whose `_id` matches `post`. A miss is a
    /// successful no-op with `n == 0`.
    pub fn update(
        &self,
        ns: &NamespaceId,
        post: Document,
        concern: WriteConcern,
        session: Option<SessionInfo>,
    ) -> Result<WriteResult> {
        with_stale_retry(&self.router, ns, |routing| {
            if let Some(prior) = self.prior_result(routing, session)? {
                return decode_write_result(prior);
            }
            let key = routing.pattern.extract(&post)?;
            let shard = self.target_shard(routing, ns, &key)?;
            let id = post.id();
            let Some(current) = read_current(shard, ns, &id)? else {
                let result = WriteResult {
                    n: 0,
                    optime: last_applied(shard),
                };
                self.record_session(shard, session, &result);
                return Ok(result);
            };
            let pre = self.pre_images.read().contains(ns).then(|| current);
            let ui = self.collection_ui(shard, routing, ns);
            let optime = self.replicate(
                shard,
                EntryBody {
                    ns: ns.clone(),
                    ui,
                    op: OpKind::Update {
                        post: post.clone(),
                        pre,
                    },
                    from_migrate: false,
                    session,
                },
                concern,
            )?;
            shard.indexes(ns).on_write(&post);
            let result = WriteResult { n: 1, optime };
            self.record_session(shard, session, &result);
            Ok(result)
        })
    }

    /// Delete by `_id`. The document is located first so the shard key
    /// (and so the route) can be recovered from it.
    pub fn delete(
        &self,
        ns: &NamespaceId,
        id: &DocumentId,
        concern: WriteConcern,
        session: Option<SessionInfo>,
    ) -> Result<WriteResult> {
        with_stale_retry(&self.router, ns, |routing| {
            if let Some(prior) = self.prior_result(routing, session)? {
                return decode_write_result(prior);
            }
            let Some(current) = self.locate(routing, ns, id)? else {
                // A miss is still a statement outcome; record it on an
                // owning shard so a retry replays n == 0 instead of
                // deleting whatever arrived in between.
                let shard = self.owning_shards(routing)?[0];
                let result = WriteResult {
                    n: 0,
                    optime: last_applied(shard),
                };
                self.record_session(shard, session, &result);
                return Ok(result);
            };
            let key = routing.pattern.extract(&current)?;
            let shard = self.target_shard(routing, ns, &key)?;
            let pre = self.pre_images.read().contains(ns).then(|| current);
            let ui = self.collection_ui(shard, routing, ns);
            let optime = self.replicate(
                shard,
                EntryBody {
                    ns: ns.clone(),
                    ui,
                    op: OpKind::Delete {
                        id: id.clone(),
                        pre,
                    },
                    from_migrate: false,
                    session,
                },
                concern,
            )?;
            shard.indexes(ns).on_delete(id);
            let result = WriteResult { n: 1, optime };
            self.record_session(shard, session, &result);
            Ok(result)
        })
    }

    /// Atomically set top-level fields on one document and return the
    /// requested image. `None` when no document has that `_id`.
    pub fn find_and_modify(
        &self,
        ns: &NamespaceId,
        id: &DocumentId,
        set_fields: &[(String, Value)],
        image: ReturnImage,
        concern: WriteConcern,
        session: Option<SessionInfo>,
    ) -> Result<Option<Document>> {
        with_stale_retry(&self.router, ns, |routing| {
            if let Some(prior) = self.prior_result(routing, session)? {
                return serde_json::from_value(prior)
                    .map_err(|e| Error::Serialization(e.to_string()));
            }
            let Some(current) = self.locate(routing, ns, id)? else {
                let shard = self.owning_shards(routing)?[0];
                self.record_session(shard, session, &None::<Document>);
                return Ok(None);
            };
            let key = routing.pattern.extract(&current)?;
            let shard = self.target_shard(routing, ns, &key)?;
            let mut post = current.clone();
            for (field, value) in set_fields {
                post = post.with_field(field, value.clone())?;
            }
            let pre = self.pre_images.read().contains(ns).then(|| current.clone());
            let ui = self.collection_ui(shard, routing, ns);
            self.replicate(
                shard,
                EntryBody {
                    ns: ns.clone(),
                    ui,
                    op: OpKind::Update {
                        post: post.clone(),
                        pre,
                    },
                    from_migrate: false,
                    session,
                },
                concern,
            )?;
            shard.indexes(ns).on_write(&post);
            let returned = Some(match image {
                ReturnImage::Pre => current.clone(),
                ReturnImage::Post => post,
            });
            self.record_session(shard, session, &returned);
            Ok(returned)
        })
    }

    // ---- Reads --------------------------------------------------------

    /// Scatter `filter` to every owning shard and merge. Each shard's
    /// contribution is trimmed to the ranges it owns, so orphans left by
    /// a best-effort post-migration cleanup never surface.
    pub fn find(&self, ns: &NamespaceId, filter: &Filter) -> Result<Vec<Document>> {
        with_stale_retry(&self.router, ns, |routing| {
            let mut merged = Vec::new();
            for shard in self.owning_shards(routing)? {
                shard
                    .handle
                    .gate
                    .check(ns, stamp_for(routing, &shard.handle.id))?;
                let owned: Vec<&ChunkRange> = routing
                    .chunks
                    .chunks()
                    .iter()
                    .filter(|c| c.shard == shard.handle.id)
                    .map(|c| &c.range)
                    .collect();
                for doc in shard.run_find(ns, filter)? {
                    let key = routing.pattern.extract(&doc)?;
                    if owned.iter().any(|r| r.contains(&key)) {
                        merged.push(doc);
                    }
                }
            }
            match &filter.sort {
                Some(field) => merged.sort_by(|a, b| a.get_key(field).cmp(&b.get_key(field))),
                None => merged.sort_by_key(|d| d.id()),
            }
            Ok(merged)
        })
    }

    /// Point read by `_id` across the owning shards.
    pub fn find_by_id(&self, ns: &NamespaceId, id: &DocumentId) -> Result<Option<Document>> {
        with_stale_retry(&self.router, ns, |routing| self.locate(routing, ns, id))
    }

    // ---- Change streams -----------------------------------------------

    pub fn watch(&self, ns: &NamespaceId) -> ClusterChangeStream {
        ClusterChangeStream::open(
            self.sets(),
            StreamScope::Collection(ns.clone()),
            self.feature_compatibility(),
        )
    }

    pub fn watch_cluster(&self) -> ClusterChangeStream {
        ClusterChangeStream::open(self.sets(), StreamScope::Cluster, self.feature_compatibility())
    }

    pub fn watch_resume(
        &self,
        scope: StreamScope,
        token: ResumeToken,
    ) -> Result<ClusterChangeStream> {
        ClusterChangeStream::resume_after(self.sets(), scope, self.feature_compatibility(), token)
    }

    // ---- Cluster settings ---------------------------------------------

    pub fn feature_compatibility(&self) -> FeatureCompatibility {
        *self.fcv.read()
    }

    pub fn set_feature_compatibility(&self, fcv: FeatureCompatibility) {
        info!(?fcv, "feature compatibility changed");
        *self.fcv.write() = fcv;
    }

    /// Record pre-images on update/delete entries for `ns`. Change
    /// streams and migration catch-up read them back.
    pub fn enable_pre_images(&self, ns: &NamespaceId) {
        self.pre_images.write().insert(ns.clone());
    }

    pub fn disable_pre_images(&self, ns: &NamespaceId) {
        self.pre_images.write().remove(ns);
    }

    // ---- Routing internals --------------------------------------------

    /// The shard that owns `key`, after its gate accepted our stamp and
    /// with no migration critical section covering the key.
    fn target_shard(
        &self,
        routing: &CollectionRouting,
        ns: &NamespaceId,
        key: &ShardKey,
    ) -> Result<&Shard> {
        let chunk = routing.chunks.find(key);
        let shard = self.shard_named(&chunk.shard)?;
        shard
            .handle
            .gate
            .check(ns, stamp_for(routing, &chunk.shard))?;
        if self.coordinator.write_blocked(ns, key) {
            return Err(Error::LockTimeout(format!(
                "migration critical section covers the key on {ns}"
            )));
        }
        Ok(shard)
    }

    /// Every shard owning at least one chunk, in chunk order.
    fn owning_shards(&self, routing: &CollectionRouting) -> Result<Vec<&Shard>> {
        let mut ids: Vec<&ShardId> = Vec::new();
        for chunk in routing.chunks.chunks() {
            if !ids.contains(&&chunk.shard) {
                ids.push(&chunk.shard);
            }
        }
        ids.into_iter().map(|id| self.shard_named(id)).collect()
    }

    fn locate(
        &self,
        routing: &CollectionRouting,
        ns: &NamespaceId,
        id: &DocumentId,
    ) -> Result<Option<Document>> {
        for shard in self.owning_shards(routing)? {
            if let Some(doc) = read_current(shard, ns, id)? {
                let key = routing.pattern.extract(&doc)?;
                // Skip orphans; the owner has the authoritative copy.
                if routing.chunks.find(&key).shard == shard.handle.id {
                    return Ok(Some(doc));
                }
            }
        }
        Ok(None)
    }

    /// The collection UUID to stamp on new entries. A shard that has not
    /// materialized the collection yet uses the routing epoch, which is
    /// the UUID the collection was created under.
    fn collection_ui(
        &self,
        shard: &Shard,
        routing: &CollectionRouting,
        ns: &NamespaceId,
    ) -> uuid::Uuid {
        shard
            .set()
            .primary_engine()
            .collection_uuid(ns)
            .unwrap_or(routing.epoch)
    }

    /// First recorded result for this statement on any owning shard.
    /// Session history follows chunks around, so the shard that ran the
    /// original statement is not necessarily the one that remembers it.
    fn prior_result(
        &self,
        routing: &CollectionRouting,
        session: Option<SessionInfo>,
    ) -> Result<Option<Value>> {
        let Some(info) = session else {
            return Ok(None);
        };
        for shard in self.owning_shards(routing)? {
            if let Some(value) =
                shard
                    .handle
                    .sessions
                    .check_retry(info.lsid, info.txn_number, info.stmt_id)?
            {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Write one entry on a shard, gossiping cluster time both ways.
    fn replicate(&self, shard: &Shard, body: EntryBody, concern: WriteConcern) -> Result<OpTime> {
        shard.set().observe_cluster_time(*self.gossip.lock());
        let optime = shard.set().write(vec![body], concern)?;
        let mut gossip = self.gossip.lock();
        if optime.ts > *gossip {
            *gossip = optime.ts;
        }
        Ok(optime)
    }

    fn record_session<T: Serialize>(&self, shard: &Shard, session: Option<SessionInfo>, result: &T) {
        let Some(info) = session else { return };
        match serde_json::to_value(result) {
            Ok(value) => shard
                .handle
                .sessions
                .record(info.lsid, info.txn_number, info.stmt_id, value),
            Err(err) => {
                tracing::warn!(%err, "session result not recordable, retry protection lost")
            }
        }
    }
}

fn stamp_for(routing: &CollectionRouting, shard: &ShardId) -> ShardVersion {
    routing
        .chunks
        .shard_version(shard)
        .expect("owning shard has a version")
}

fn last_applied(shard: &Shard) -> OpTime {
    let set = shard.set();
    set.last_applied(set.primary_index())
}

/// The primary's current copy of one document. A collection the shard
/// has never seen reads as absent.
fn read_current(shard: &Shard, ns: &NamespaceId, id: &DocumentId) -> Result<Option<Document>> {
    let set = shard.set();
    let ts = set.last_applied(set.primary_index()).ts;
    match set.primary_engine().get_at(ns, id, ts) {
        Ok(doc) => Ok(doc),
        Err(Error::NamespaceNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn decode_write_result(value: Value) -> Result<WriteResult> {
    serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}
