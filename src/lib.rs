//! Tessera - Replicated, sharded document database core
//!
//! Tessera is an in-process document database core: MVCC storage under
//! replica sets with majority commit, chunk-based sharding with live
//! migration, resumable change streams, and a works-based query planner.
//!
//! # Quick Start
//!
//! ```ignore
//! use tesseradb::{Cluster, ClusterConfig, Document, Filter, ShardKeyPattern, WriteConcern};
//!
//! // Two shards, three members each
//! let cluster = Cluster::new(ClusterConfig::default());
//!
//! let ns = tesseradb::NamespaceId::new("app", "users");
//! cluster.shard_collection(&ns, ShardKeyPattern::on("_id"))?;
//!
//! cluster.insert(&ns, Document::parse(r#"{"_id": 1, "name": "alice"}"#)?,
//!     WriteConcern::Majority, None)?;
//!
//! let everyone = cluster.find(&ns, &Filter::default())?;
//! ```
//!
//! # Architecture
//!
//! The [`Cluster`] methods are the library equivalent of database
//! commands. Writes route by shard key through a stale-retrying router,
//! replicate through each shard's oplog, and become visible to change
//! streams once majority-committed. The layer crates (`tessera-storage`,
//! `tessera-repl`, `tessera-router`, ...) are re-exported for tests and
//! embedders that need to reach below the command surface.

pub use tessera_core::{
    ChunkRange, ClusterTime, Document, DocumentId, Error, FeatureCompatibility, KeyValue,
    NamespaceId, OpTime, Result, SessionId, ShardId, ShardKey, ShardKeyPattern, ShardVersion,
    StmtId, TxnNumber,
};
pub use tessera_core::{BalancerConfig, PlannerConfig, ReplConfig, StorageConfig};
pub use tessera_core::failpoint;
pub use tessera_engine::{
    Cluster, ClusterConfig, ReturnImage, SessionInfo, Shard, WriteConcern, WriteResult,
};

pub use tessera_changestream as changestream;
pub use tessera_migration as migration;
pub use tessera_planner as planner;
pub use tessera_repl as repl;
pub use tessera_router as router;
pub use tessera_storage as storage;

pub use tessera_changestream::{
    ChangeEvent, ClusterChangeStream, EventKind, ResumeToken, StreamScope,
};
pub use tessera_planner::{Clause, CmpOp, Filter};
