//! Router-side routing cache and the refresh-and-retry loop
//!
//! A `RoutingCache` holds a possibly stale copy of each collection's
//! routing. `with_stale_retry` is the driver: it hands the cached routing
//! to an operation closure; when the closure comes back with
//! `StaleConfig`, the cache refreshes from the catalog and the operation
//! is retried, up to `MAX_STALE_RETRIES` attempts. Any other outcome
//! passes straight through.

use crate::catalog::{CollectionRouting, ConfigCatalog};
use crate::MAX_STALE_RETRIES;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{
    ChunkRange, Error, NamespaceId, Result, ShardId, ShardKey, ShardVersion,
};
use tracing::debug;

/// Cached routing tables for one router
pub struct RoutingCache {
    catalog: Arc<ConfigCatalog>,
    cached: RwLock<HashMap<NamespaceId, CollectionRouting>>,
}

impl RoutingCache {
    pub fn new(catalog: Arc<ConfigCatalog>) -> Self {
        Self {
            catalog,
            cached: RwLock::new(HashMap::new()),
        }
    }

    /// Cached routing for `ns`, loading from the catalog on first use.
    pub fn routing(&self, ns: &NamespaceId) -> Result<CollectionRouting> {
        if let Some(routing) = self.cached.read().get(ns) {
            return Ok(routing.clone());
        }
        self.refresh(ns)
    }

    /// Force-reload from the catalog.
    pub fn refresh(&self, ns: &NamespaceId) -> Result<CollectionRouting> {
        let routing = self.catalog.routing(ns)?;
        debug!(ns = %ns, version = %routing.collection_version(), "routing cache refreshed");
        self.cached.write().insert(ns.clone(), routing.clone());
        Ok(routing)
    }

    /// Drop the cached entry (collection dropped).
    pub fn invalidate(&self, ns: &NamespaceId) {
        self.cached.write().remove(ns);
    }

    /// Route one key: the owning shard and the version stamp to send.
    ///
    /// The stamp is the cached shard version of the *target* shard, which
    /// is what the shard's gate compares against.
    pub fn route(&self, ns: &NamespaceId, key: &ShardKey) -> Result<(ShardId, ShardVersion)> {
        let routing = self.routing(ns)?;
        let chunk = routing.chunks.find(key);
        let stamp = routing
            .chunks
            .shard_version(&chunk.shard)
            .expect("owning shard has a version");
        Ok((chunk.shard.clone(), stamp))
    }

    /// Route a key range: every owning shard with its stamp and sub-range.
    pub fn route_range(
        &self,
        ns: &NamespaceId,
        range: &ChunkRange,
    ) -> Result<Vec<(ShardId, ShardVersion, ChunkRange)>> {
        let routing = self.routing(ns)?;
        Ok(routing
            .chunks
            .shards_for_range(range)
            .into_iter()
            .map(|(shard, sub)| {
                let stamp = routing
                    .chunks
                    .shard_version(&shard)
                    .expect("owning shard has a version");
                (shard, stamp, sub)
            })
            .collect())
    }

    /// Version currently cached for `ns`, if any (test observability).
    pub fn cached_version(&self, ns: &NamespaceId) -> Option<ShardVersion> {
        self.cached
            .read()
            .get(ns)
            .map(|routing| routing.collection_version())
    }
}

/// Run a routed operation, refreshing the cache on `StaleConfig`.
pub fn with_stale_retry<T>(
    cache: &RoutingCache,
    ns: &NamespaceId,
    mut op: impl FnMut(&CollectionRouting) -> Result<T>,
) -> Result<T> {
    let mut last_stale: Option<Error> = None;
    for attempt in 0..MAX_STALE_RETRIES {
        let routing = cache.routing(ns)?;
        match op(&routing) {
            Err(err @ Error::StaleConfig { .. }) => {
                debug!(ns = %ns, attempt, error = %err, "stale routing, refreshing");
                last_stale = Some(err);
                cache.refresh(ns)?;
            }
            other => return other,
        }
    }
    Err(last_stale.expect("loop ran at least once"))
}
