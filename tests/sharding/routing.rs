//! Routed reads and writes across splits, moves, and drops.

use crate::common::*;
use tesseradb::{Error, Filter, WriteConcern};

#[test]
fn writes_land_on_the_owning_shard_after_split_and_move() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    split_and_move(&cluster, &ns, 50);

    seed(&cluster, &ns, &[1, 49, 50, 99]);

    assert_eq!(
        ids_of(&cluster.shard(0).snapshot(&ns).unwrap()),
        int_ids(&[1, 49])
    );
    assert_eq!(
        ids_of(&cluster.shard(1).snapshot(&ns).unwrap()),
        int_ids(&[50, 99])
    );
    assert_eq!(
        ids_of(&cluster.find(&ns, &Filter::default()).unwrap()),
        int_ids(&[1, 49, 50, 99])
    );
}

#[test]
fn scatter_gather_merges_a_sorted_result() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    split_and_move(&cluster, &ns, 50);
    for (id, n) in [(10, 5), (60, 1), (20, 3), (70, 4), (30, 2)] {
        cluster
            .insert(&ns, doc(id, n), WriteConcern::Majority, None)
            .unwrap();
    }

    let sorted = cluster
        .find(&ns, &Filter::default().sorted_by("n"))
        .unwrap();
    assert_eq!(ids_of(&sorted), int_ids(&[60, 30, 20, 70, 10]));
}

#[test]
fn duplicate_insert_is_rejected_by_the_owning_shard() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    split_and_move(&cluster, &ns, 50);
    seed(&cluster, &ns, &[75]);

    let err = cluster
        .insert(&ns, doc(75, 0), WriteConcern::Majority, None)
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateKey(_)));
}

#[test]
fn recreated_collection_gets_a_fresh_epoch() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    seed(&cluster, &ns, &[1]);
    let old_epoch = cluster.catalog().routing(&ns).unwrap().epoch;

    cluster.drop_collection(&ns).unwrap();
    let ns = shard_on_id(&cluster, "orders");
    assert_ne!(cluster.catalog().routing(&ns).unwrap().epoch, old_epoch);
    assert!(cluster.find(&ns, &Filter::default()).unwrap().is_empty());
}

#[test]
fn injected_write_conflicts_are_absorbed_by_the_write_path() {
    use tesseradb::failpoint::{FailPointGuard, FailPointMode};

    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");

    let _guard = FailPointGuard::enable(
        tesseradb::storage::FP_WRITE_CONFLICT,
        FailPointMode::Times(2),
    );
    cluster
        .insert(&ns, doc(1, 1), WriteConcern::Majority, None)
        .unwrap();
    assert_eq!(
        ids_of(&cluster.find(&ns, &Filter::default()).unwrap()),
        int_ids(&[1])
    );
}

#[test]
fn unknown_collection_is_not_routable() {
    let cluster = small_cluster();
    let err = cluster
        .insert(&ns("nowhere"), doc(1, 1), WriteConcern::Majority, None)
        .unwrap_err();
    assert!(matches!(err, Error::NamespaceNotFound(_)));
}
