//! Core types for the Tessera database
//!
//! This crate defines the foundational vocabulary shared by every layer:
//! - Identity types: `NamespaceId`, `DocumentId`, `ShardId`, `SessionId`
//! - Logical time: `ClusterTime`, `OpTime`
//! - Sharding types: `ShardKey`, `ShardKeyPattern`, `ChunkRange`, `ShardVersion`
//! - The `Document` value wrapper
//! - The `Error` enum and `Result` alias
//! - Configuration structs
//! - The failpoint registry used by tests to force internal timing

pub mod config;
pub mod document;
pub mod error;
pub mod failpoint;
pub mod types;

pub use config::{
    BalancerConfig, FeatureCompatibility, PlannerConfig, ReplConfig, StorageConfig,
};
pub use document::{Document, KeyValue};
pub use error::{Error, Result};
pub use types::{
    ChunkRange, ClusterTime, DocumentId, NamespaceId, OpTime, SessionId, ShardId, ShardKey,
    ShardKeyPattern, ShardVersion, StmtId, TxnNumber,
};
