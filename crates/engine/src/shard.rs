//! One shard: a replica set plus primary-side planner state
//!
//! Secondary indexes and the plan cache describe the primary's data. They
//! are maintained inline on routed writes and rebuilt wholesale after the
//! bulk paths that bypass the command layer (chunk migration, elections).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use tessera_core::{Document, NamespaceId, PlannerConfig, Result};
use tessera_migration::ShardHandle;
use tessera_planner::{CollectionIndexes, Filter, QueryPlanner};
use tessera_repl::ReplicaSet;
use tracing::debug;

pub struct Shard {
    pub handle: ShardHandle,
    planner_config: PlannerConfig,
    planners: RwLock<HashMap<NamespaceId, Arc<QueryPlanner>>>,
    indexes: RwLock<HashMap<NamespaceId, Arc<CollectionIndexes>>>,
}

impl Shard {
    pub fn new(handle: ShardHandle, planner_config: PlannerConfig) -> Self {
        Self {
            handle,
            planner_config,
            planners: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self) -> &Arc<ReplicaSet> {
        &self.handle.set
    }

    pub fn planner(&self, ns: &NamespaceId) -> Arc<QueryPlanner> {
        if let Some(planner) = self.planners.read().get(ns) {
            return planner.clone();
        }
        self.planners
            .write()
            .entry(ns.clone())
            .or_insert_with(|| Arc::new(QueryPlanner::new(self.planner_config.clone())))
            .clone()
    }

    pub fn indexes(&self, ns: &NamespaceId) -> Arc<CollectionIndexes> {
        if let Some(indexes) = self.indexes.read().get(ns) {
            return indexes.clone();
        }
        self.indexes
            .write()
            .entry(ns.clone())
            .or_insert_with(|| Arc::new(CollectionIndexes::new()))
            .clone()
    }

    /// The primary's current view of the collection, in id order. A
    /// collection this shard has never seen reads as empty.
    pub fn snapshot(&self, ns: &NamespaceId) -> Result<Vec<Document>> {
        let set = self.set();
        let ts = set.last_applied(set.primary_index()).ts;
        match set.primary_engine().scan_at(ns, ts) {
            Ok(docs) => Ok(docs),
            Err(tessera_core::Error::NamespaceNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Run a filter on this shard through its planner.
    pub fn run_find(&self, ns: &NamespaceId, filter: &Filter) -> Result<Vec<Document>> {
        let docs = self.snapshot(ns)?;
        Ok(self.planner(ns).find(&docs, &self.indexes(ns), filter))
    }

    /// Rebuild every index of `ns` from the current primary. Used after
    /// migrations and elections, which change the primary's data outside
    /// the routed write path.
    pub fn rebuild_indexes(&self, ns: &NamespaceId) -> Result<()> {
        let docs = self.snapshot(ns)?;
        let indexes = self.indexes(ns);
        for field in indexes.indexed_fields() {
            indexes.create_index(&field, &docs);
            self.planner(ns).cache().invalidate_field(&field);
        }
        debug!(shard = %self.handle.id, ns = %ns, "indexes rebuilt");
        Ok(())
    }

    /// Namespaces with planner state on this shard.
    pub fn tracked_namespaces(&self) -> Vec<NamespaceId> {
        self.indexes.read().keys().cloned().collect()
    }

    /// Forget all planner state for a dropped collection.
    pub fn forget_collection(&self, ns: &NamespaceId) {
        self.planners.write().remove(ns);
        self.indexes.write().remove(ns);
    }
}
