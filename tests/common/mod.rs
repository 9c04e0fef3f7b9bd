//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Once;
use tesseradb::{
    ChunkRange, Cluster, ClusterConfig, Document, DocumentId, KeyValue, NamespaceId, ShardId,
    ShardKey, ShardKeyPattern, WriteConcern,
};

static TRACING: Once = Once::new();

/// Route internal tracing through the test harness. Honors RUST_LOG.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Two single-member shards. Fast, and enough for routing semantics.
pub fn small_cluster() -> Cluster {
    init_tracing();
    Cluster::new(ClusterConfig {
        shard_count: 2,
        members_per_shard: 1,
        ..ClusterConfig::default()
    })
}

/// One shard of three members, for replication-visible behavior.
pub fn replica_cluster() -> Cluster {
    init_tracing();
    Cluster::new(ClusterConfig {
        shard_count: 1,
        members_per_shard: 3,
        ..ClusterConfig::default()
    })
}

pub fn ns(coll: &str) -> NamespaceId {
    NamespaceId::new("testdb", coll)
}

pub fn int_key(v: i64) -> ShardKey {
    ShardKey(vec![KeyValue::Int(v)])
}

pub fn doc(id: i64, n: i64) -> Document {
    Document::parse(&format!(r#"{{"_id": {id}, "n": {n}}}"#)).unwrap()
}

/// Shard `coll` on `_id` and hand back the namespace.
pub fn shard_on_id(cluster: &Cluster, coll: &str) -> NamespaceId {
    let ns = ns(coll);
    cluster
        .shard_collection(&ns, ShardKeyPattern::on("_id"))
        .unwrap();
    ns
}

/// Split at `at` and move the upper chunk to shard1. Returns the moved
/// range.
pub fn split_and_move(cluster: &Cluster, ns: &NamespaceId, at: i64) -> ChunkRange {
    cluster.split_chunk(ns, &int_key(at)).unwrap();
    let range = cluster.catalog().routing(ns).unwrap().chunks.chunks()[1]
        .range
        .clone();
    cluster
        .move_chunk(ns, &range, &ShardId::new("shard1"))
        .unwrap();
    range
}

pub fn seed(cluster: &Cluster, ns: &NamespaceId, ids: &[i64]) {
    for &id in ids {
        cluster
            .insert(ns, doc(id, id), WriteConcern::Majority, None)
            .unwrap();
    }
}

pub fn ids_of(docs: &[Document]) -> Vec<DocumentId> {
    docs.iter().map(Document::id).collect()
}

pub fn int_ids(ids: &[i64]) -> Vec<DocumentId> {
    ids.iter().copied().map(DocumentId::int).collect()
}
