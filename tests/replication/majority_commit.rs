//! Write concern and commit point behavior through the cluster surface.

use crate::common::*;
use tesseradb::{Error, WriteConcern};

#[test]
fn majority_write_fails_with_both_secondaries_paused() {
    let cluster = replica_cluster();
    let ns = shard_on_id(&cluster, "events");
    let set = cluster.shard(0).set().clone();

    set.pause_replication(1);
    set.pause_replication(2);

    let err = cluster
        .insert(&ns, doc(1, 1), WriteConcern::Majority, None)
        .unwrap_err();
    assert!(matches!(err, Error::WriteConcernFailed(_)));

    // The primary applied it anyway; the concern only reports.
    let local = cluster
        .insert(&ns, doc(2, 2), WriteConcern::Local, None)
        .unwrap();
    assert_eq!(local.n, 1);

    // One secondary catching up restores a majority for both writes.
    set.resume_replication(1).unwrap();
    assert!(set.majority_commit_point() >= local.optime);
}

#[test]
fn one_paused_secondary_does_not_block_majority() {
    let cluster = replica_cluster();
    let ns = shard_on_id(&cluster, "events");
    let set = cluster.shard(0).set().clone();

    set.pause_replication(2);
    let result = cluster
        .insert(&ns, doc(1, 1), WriteConcern::Majority, None)
        .unwrap();
    assert_eq!(set.majority_commit_point(), result.optime);
}

#[test]
fn stable_timestamp_tracks_the_commit_point() {
    let cluster = replica_cluster();
    let ns = shard_on_id(&cluster, "events");
    seed(&cluster, &ns, &[1, 2, 3]);

    let set = cluster.shard(0).set();
    assert_eq!(
        set.primary_engine().stable_timestamp(),
        set.majority_commit_point().ts
    );
}

#[test]
fn commit_point_holds_while_a_minority_lags() {
    let cluster = replica_cluster();
    let ns = shard_on_id(&cluster, "events");
    seed(&cluster, &ns, &[1]);
    let set = cluster.shard(0).set().clone();
    let before = set.majority_commit_point();

    set.pause_replication(1);
    set.pause_replication(2);
    cluster
        .insert(&ns, doc(2, 2), WriteConcern::Local, None)
        .unwrap();

    // Only the primary holds the new write.
    assert_eq!(set.majority_commit_point(), before);
    set.resume_replication(1).unwrap();
    assert!(set.majority_commit_point() > before);
}
