//! Config catalog: the authoritative routing metadata
//!
//! One catalog per cluster. It owns the shard registry and, per sharded
//! collection, the shard key pattern, the routing epoch, and the chunk
//! map. All structural changes (split, merge, move commit) go through the
//! catalog so version allocation has a single writer.

use crate::chunk_map::ChunkMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_core::{
    ChunkRange, Error, NamespaceId, Result, ShardId, ShardKey, ShardKeyPattern, ShardVersion,
};
use tracing::info;
use uuid::Uuid;

/// Routing metadata for one sharded collection
#[derive(Debug, Clone)]
pub struct CollectionRouting {
    pub pattern: ShardKeyPattern,
    pub epoch: Uuid,
    pub chunks: ChunkMap,
}

impl CollectionRouting {
    pub fn collection_version(&self) -> ShardVersion {
        self.chunks.collection_version()
    }
}

/// Authoritative cluster routing state
#[derive(Debug, Default)]
pub struct ConfigCatalog {
    shards: RwLock<Vec<ShardId>>,
    collections: RwLock<HashMap<NamespaceId, CollectionRouting>>,
}

impl ConfigCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shard(&self, shard: ShardId) {
        let mut shards = self.shards.write();
        if !shards.contains(&shard) {
            shards.push(shard);
        }
    }

    pub fn shards(&self) -> Vec<ShardId> {
        self.shards.read().clone()
    }

    /// Shard a collection: one full-range chunk on `primary_shard`, a
    /// fresh epoch.
    pub fn shard_collection(
        &self,
        ns: NamespaceId,
        pattern: ShardKeyPattern,
        primary_shard: ShardId,
    ) -> Result<Uuid> {
        if !self.shards.read().contains(&primary_shard) {
            return Err(Error::InvalidOperation(format!(
                "unknown shard {primary_shard}"
            )));
        }
        let mut collections = self.collections.write();
        if collections.contains_key(&ns) {
            return Err(Error::InvalidOperation(format!(
                "{ns} is already sharded"
            )));
        }
        let epoch = Uuid::new_v4();
        let chunks = ChunkMap::initial(
            pattern.fields.len(),
            primary_shard,
            ShardVersion::initial(epoch),
        );
        collections.insert(
            ns.clone(),
            CollectionRouting {
                pattern,
                epoch,
                chunks,
            },
        );
        info!(ns = %ns, epoch = %epoch, "collection sharded");
        Ok(epoch)
    }

    /// Remove routing state (collection drop). The epoch dies with it; a
    /// recreated collection gets a new epoch and old caches go stale.
    pub fn drop_collection(&self, ns: &NamespaceId) -> Result<()> {
        self.collections
            .write()
            .remove(ns)
            .map(|_| ())
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))
    }

    /// Snapshot of one collection's routing.
    pub fn routing(&self, ns: &NamespaceId) -> Result<CollectionRouting> {
        self.collections
            .read()
            .get(ns)
            .cloned()
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))
    }

    pub fn is_sharded(&self, ns: &NamespaceId) -> bool {
        self.collections.read().contains_key(ns)
    }

    pub fn split_chunk(&self, ns: &NamespaceId, at: &ShardKey) -> Result<()> {
        let mut collections = self.collections.write();
        let routing = collections
            .get_mut(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))?;
        routing.chunks.split(at)
    }

    pub fn merge_chunks(&self, ns: &NamespaceId, range: &ChunkRange) -> Result<()> {
        let mut collections = self.collections.write();
        let routing = collections
            .get_mut(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))?;
        routing.chunks.merge(range)
    }

    /// Flip ownership of a chunk. Called by the migration coordinator at
    /// commit time only; returns the recipient's new shard version.
    pub fn commit_move(
        &self,
        ns: &NamespaceId,
        range: &ChunkRange,
        to: ShardId,
    ) -> Result<ShardVersion> {
        if !self.shards.read().contains(&to) {
            return Err(Error::InvalidOperation(format!("unknown shard {to}")));
        }
        let mut collections = self.collections.write();
        let routing = collections
            .get_mut(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.clone()))?;
        let version = routing.chunks.commit_move(range, to.clone())?;
        info!(ns = %ns, range = %range, to = %to, version = %version, "chunk move committed");
        Ok(version)
    }
}
