//! Shard-side placement version gate
//!
//! Each shard tracks the placement version it believes it owns per
//! collection. Routed requests arrive stamped with the router's cached
//! version; the gate admits a request only when the epochs match and the
//! stamped version is not behind. Everything else is `StaleConfig`, which
//! the router treats as "refresh and retry", never as a user-facing error.

use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_core::{Error, NamespaceId, Result, ShardVersion};
use uuid::Uuid;

fn unowned() -> ShardVersion {
    ShardVersion {
        epoch: Uuid::nil(),
        major: 0,
        minor: 0,
    }
}

/// Per-shard placement knowledge
#[derive(Debug, Default)]
pub struct ShardVersionGate {
    owned: RwLock<HashMap<NamespaceId, ShardVersion>>,
}

impl ShardVersionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what this shard owns for `ns` (set at shard time and on
    /// migration commit).
    pub fn set(&self, ns: NamespaceId, version: ShardVersion) {
        self.owned.write().insert(ns, version);
    }

    /// Forget a collection (drop, or all chunks moved away).
    pub fn clear(&self, ns: &NamespaceId) {
        self.owned.write().remove(ns);
    }

    pub fn owned(&self, ns: &NamespaceId) -> Option<ShardVersion> {
        self.owned.read().get(ns).copied()
    }

    /// Admit or reject a stamped request.
    pub fn check(&self, ns: &NamespaceId, stamped: ShardVersion) -> Result<()> {
        let owned = self.owned(ns).unwrap_or_else(unowned);
        if stamped.epoch != owned.epoch {
            return Err(Error::StaleConfig {
                ns: ns.clone(),
                wanted: owned,
                got: stamped,
            });
        }
        if (stamped.major, stamped.minor) < (owned.major, owned.minor) {
            return Err(Error::StaleConfig {
                ns: ns.clone(),
                wanted: owned,
                got: stamped,
            });
        }
        Ok(())
    }
}
