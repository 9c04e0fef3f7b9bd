//! Sharding router: chunk maps, routing cache, stale-version protocol
//!
//! The authoritative picture of who owns which key range lives in the
//! `ConfigCatalog`. Routers hold a `RoutingCache` that may be arbitrarily
//! stale; every routed operation is stamped with the cached placement
//! version, and the target shard's `ShardVersionGate` rejects mismatches
//! with `StaleConfig`. The router then refreshes and retries. Staleness is
//! an expected state, not an error the caller sees.

pub mod cache;
pub mod catalog;
pub mod chunk_map;
pub mod gate;

pub use cache::{with_stale_retry, RoutingCache};
pub use catalog::{CollectionRouting, ConfigCatalog};
pub use chunk_map::{Chunk, ChunkMap};
pub use gate::ShardVersionGate;

/// Bounded attempts for the refresh-and-retry loop.
pub const MAX_STALE_RETRIES: u32 = 8;
