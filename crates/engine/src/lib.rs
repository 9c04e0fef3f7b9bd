//! Cluster engine: shards, routing, and the command surface
//!
//! This crate wires the layers together into an in-process cluster: a
//! config catalog, N shards (each a replica set with planner state), a
//! routing cache with stale-retry, a migration coordinator, and change
//! stream constructors. The `Cluster` methods are the library equivalent
//! of database commands; there is no wire protocol.

pub mod cluster;
pub mod shard;

pub use cluster::{Cluster, ClusterConfig, ReturnImage, WriteResult};
pub use shard::Shard;

pub use tessera_repl::{SessionInfo, WriteConcern};
