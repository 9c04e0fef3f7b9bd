//! Forced elections: divergence rollback and post-election service.

use crate::common::*;
use std::sync::Arc;
use tesseradb::repl::{command_body, CommandKind, EntryBody, OpKind, ReplicaSet, WriteConcern};
use tesseradb::{
    Clause, ClusterTime, CmpOp, Filter, KeyValue, ReplConfig, StorageConfig,
};
use uuid::Uuid;

fn insert_body(set_ns: &tesseradb::NamespaceId, ui: Uuid, id: i64) -> EntryBody {
    EntryBody {
        ns: set_ns.clone(),
        ui,
        op: OpKind::Insert { doc: doc(id, id) },
        from_migrate: false,
        session: None,
    }
}

#[test]
fn diverged_old_primary_rolls_back_to_the_new_primary() {
    let set = Arc::new(ReplicaSet::new(
        "rs0",
        3,
        StorageConfig::default(),
        ReplConfig::default(),
    ));
    let collection = ns("events");
    let ui = Uuid::new_v4();
    set.write(
        vec![command_body(collection.clone(), ui, CommandKind::CreateCollection)],
        WriteConcern::Majority,
    )
    .unwrap();
    set.write(vec![insert_body(&collection, ui, 1)], WriteConcern::Majority)
        .unwrap();

    // Member 0 accepts a write a majority never sees.
    set.pause_replication(1);
    set.pause_replication(2);
    set.write(vec![insert_body(&collection, ui, 99)], WriteConcern::Local)
        .unwrap();

    set.step_up(1).unwrap();

    // The divergent write is gone from every member.
    for i in 0..3 {
        let engine = set.engine(i);
        let docs = engine
            .scan_at(&collection, set.last_applied(i).ts)
            .unwrap();
        assert_eq!(
            ids_of(&docs),
            int_ids(&[1]),
            "member {i} still holds the rolled-back write"
        );
    }
    assert_eq!(set.term(), 2);
    assert_eq!(set.primary_index(), 1);
}

#[test]
fn oplogs_truncate_with_the_rollback() {
    let set = Arc::new(ReplicaSet::new(
        "rs0",
        3,
        StorageConfig::default(),
        ReplConfig::default(),
    ));
    let collection = ns("events");
    let ui = Uuid::new_v4();
    set.write(
        vec![command_body(collection.clone(), ui, CommandKind::CreateCollection)],
        WriteConcern::Majority,
    )
    .unwrap();

    set.pause_replication(1);
    set.pause_replication(2);
    set.write(vec![insert_body(&collection, ui, 99)], WriteConcern::Local)
        .unwrap();

    set.step_up(2).unwrap();
    let replayable: Vec<_> = set
        .oplog(0)
        .entries_after(ClusterTime::ZERO)
        .into_iter()
        .filter(|e| matches!(e.op, OpKind::Insert { .. }))
        .collect();
    assert!(replayable.is_empty(), "truncated entry still in the oplog");
}

#[test]
fn cluster_election_keeps_serving_indexed_queries() {
    let cluster = replica_cluster();
    let collection = shard_on_id(&cluster, "users");
    for i in 0..12 {
        cluster
            .insert(
                &collection,
                doc(i, i % 3),
                tesseradb::WriteConcern::Majority,
                None,
            )
            .unwrap();
    }
    cluster.create_index(&collection, "n").unwrap();

    cluster.step_up(0, 1).unwrap();

    let filter = Filter::new(vec![Clause::new("n", CmpOp::Eq, KeyValue::Int(2))]);
    assert_eq!(cluster.find(&collection, &filter).unwrap().len(), 4);
    assert_eq!(cluster.shard(0).set().primary_index(), 1);

    // The new primary keeps taking writes.
    cluster
        .insert(&collection, doc(100, 2), tesseradb::WriteConcern::Majority, None)
        .unwrap();
    assert_eq!(cluster.find(&collection, &filter).unwrap().len(), 5);
}
