//! Event delivery: ordering, commit visibility, diffs, invalidation.

use crate::common::*;
use tesseradb::changestream::EventKind;
use tesseradb::{DocumentId, FeatureCompatibility, KeyValue, WriteConcern};

#[test]
fn routed_writes_become_events_on_every_shard() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    split_and_move(&cluster, &ns, 50);

    let mut stream = cluster.watch(&ns);
    seed(&cluster, &ns, &[10, 60, 20, 70]);

    let events = stream.next_batch().unwrap();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.kind == EventKind::Insert));
    // Tokens come out non-decreasing and per-shard order is preserved.
    assert!(events.windows(2).all(|w| w[0].token < w[1].token));
    let low: Vec<_> = events
        .iter()
        .filter_map(|e| e.id.clone())
        .filter(|id| *id < DocumentId::int(50))
        .collect();
    assert_eq!(low, int_ids(&[10, 20]));
}

#[test]
fn events_surface_only_once_majority_committed() {
    let cluster = replica_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let mut stream = cluster.watch(&ns);
    let set = cluster.shard(0).set().clone();

    set.pause_replication(1);
    set.pause_replication(2);
    cluster
        .insert(&ns, doc(1, 1), WriteConcern::Local, None)
        .unwrap();
    assert!(stream.next_batch().unwrap().is_empty());

    set.resume_replication(1).unwrap();
    let events = stream.next_batch().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, Some(DocumentId::int(1)));
}

#[test]
fn update_events_carry_diff_and_pre_image_when_recorded() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    cluster.enable_pre_images(&ns);
    let mut stream = cluster.watch(&ns);

    seed(&cluster, &ns, &[1]);
    cluster
        .update(&ns, doc(1, 42), WriteConcern::Majority, None)
        .unwrap();
    cluster
        .delete(&ns, &DocumentId::int(1), WriteConcern::Majority, None)
        .unwrap();

    let events = stream.next_batch().unwrap();
    assert_eq!(events.len(), 3);

    let update = &events[1];
    assert_eq!(update.kind, EventKind::Update);
    let desc = update.update_desc.as_ref().unwrap();
    assert_eq!(desc.updated_fields.get("n"), Some(&serde_json::json!(42)));
    assert!(desc.removed_fields.is_empty());
    assert_eq!(
        update.pre_image.as_ref().unwrap().get_key("n"),
        Some(KeyValue::Int(1))
    );

    let delete = &events[2];
    assert_eq!(delete.kind, EventKind::Delete);
    assert_eq!(
        delete.pre_image.as_ref().unwrap().get_key("n"),
        Some(KeyValue::Int(42))
    );
}

#[test]
fn migration_traffic_never_surfaces() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let mut stream = cluster.watch(&ns);
    let ids: Vec<i64> = (0..10).collect();
    seed(&cluster, &ns, &ids);

    split_and_move(&cluster, &ns, 5);
    cluster
        .insert(&ns, doc(100, 0), WriteConcern::Majority, None)
        .unwrap();

    let events = stream.next_batch().unwrap();
    // Ten seeds plus one post-move insert; clones and donor cleanup are
    // internal traffic.
    assert_eq!(events.len(), 11);
    assert!(events.iter().all(|e| e.kind == EventKind::Insert));
}

#[test]
fn drop_invalidates_collection_streams() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let mut current = cluster.watch(&ns);
    cluster.set_feature_compatibility(FeatureCompatibility::Legacy);
    let mut legacy = cluster.watch(&ns);

    seed(&cluster, &ns, &[1]);
    cluster.drop_collection(&ns).unwrap();

    let events = current.next_batch().unwrap();
    let drop = events.last().unwrap();
    assert_eq!(drop.kind, EventKind::Drop);
    assert!(drop.dropped_uuid.is_some());
    // Invalidated: nothing more comes out, ever.
    assert!(current.next_batch().unwrap().is_empty());

    let events = legacy.next_batch().unwrap();
    assert_eq!(events.last().unwrap().kind, EventKind::Drop);
    assert!(events.last().unwrap().dropped_uuid.is_none());
}
