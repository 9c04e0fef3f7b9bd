//! Chunk migration through the full command surface.

use crate::common::*;
use tesseradb::{Clause, CmpOp, Error, Filter, KeyValue, ShardId, WriteConcern};

#[test]
fn migration_moves_data_without_losing_a_document() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let ids: Vec<i64> = (0..20).collect();
    seed(&cluster, &ns, &ids);

    split_and_move(&cluster, &ns, 10);

    assert_eq!(
        ids_of(&cluster.find(&ns, &Filter::default()).unwrap()),
        int_ids(&ids)
    );
    // The donor's copies of the moved range are cleaned up.
    assert_eq!(cluster.shard(0).snapshot(&ns).unwrap().len(), 10);
    assert_eq!(cluster.shard(1).snapshot(&ns).unwrap().len(), 10);
}

#[test]
fn moved_chunk_serves_indexed_queries_on_the_recipient() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    for i in 0..20 {
        cluster
            .insert(&ns, doc(i, i % 2), WriteConcern::Majority, None)
            .unwrap();
    }
    cluster.create_index(&ns, "n").unwrap();

    split_and_move(&cluster, &ns, 10);

    let odd = Filter::new(vec![Clause::new("n", CmpOp::Eq, KeyValue::Int(1))]);
    assert_eq!(cluster.find(&ns, &odd).unwrap().len(), 10);

    // Writes after the move keep both shards' indexes current.
    cluster
        .insert(&ns, doc(101, 1), WriteConcern::Majority, None)
        .unwrap();
    assert_eq!(cluster.find(&ns, &odd).unwrap().len(), 11);
}

#[test]
fn moving_a_range_spanning_two_shards_is_rejected() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    split_and_move(&cluster, &ns, 50);

    let whole = tesseradb::ChunkRange::full(1);
    let err = cluster
        .move_chunk(&ns, &whole, &ShardId::new("shard1"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

#[test]
fn migration_carries_session_history_to_the_recipient() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let info = tesseradb::SessionInfo {
        lsid: tesseradb::SessionId::new(),
        txn_number: 1,
        stmt_id: 0,
    };
    let original = cluster
        .insert(&ns, doc(75, 7), WriteConcern::Majority, Some(info))
        .unwrap();

    split_and_move(&cluster, &ns, 50);

    // The retry reaches the recipient, which replays the donor's record.
    let retried = cluster
        .insert(&ns, doc(75, 7), WriteConcern::Majority, Some(info))
        .unwrap();
    assert_eq!(retried, original);
    assert_eq!(cluster.find(&ns, &Filter::default()).unwrap().len(), 1);
}

#[test]
fn back_to_back_moves_keep_routing_coherent() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    seed(&cluster, &ns, &[5, 55]);

    let range = split_and_move(&cluster, &ns, 50);
    cluster
        .move_chunk(&ns, &range, &ShardId::new("shard0"))
        .unwrap();

    seed(&cluster, &ns, &[60]);
    assert_eq!(
        ids_of(&cluster.shard(0).snapshot(&ns).unwrap()),
        int_ids(&[5, 55, 60])
    );
    assert!(cluster.shard(1).snapshot(&ns).unwrap().is_empty());
}
