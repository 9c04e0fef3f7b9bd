//! Retryable writes across elections and statement lifecycles.

use crate::common::*;
use tesseradb::{Error, Filter, ReturnImage, SessionId, SessionInfo, WriteConcern};

fn statement(lsid: SessionId, txn_number: u64, stmt_id: u32) -> SessionInfo {
    SessionInfo {
        lsid,
        txn_number,
        stmt_id,
    }
}

#[test]
fn retry_after_an_election_replays_the_recorded_result() {
    let cluster = replica_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let info = statement(SessionId::new(), 1, 0);

    let original = cluster
        .insert(&ns, doc(1, 1), WriteConcern::Majority, Some(info))
        .unwrap();
    cluster.step_up(0, 1).unwrap();

    let retried = cluster
        .insert(&ns, doc(1, 1), WriteConcern::Majority, Some(info))
        .unwrap();
    assert_eq!(retried, original);
    assert_eq!(cluster.find(&ns, &Filter::default()).unwrap().len(), 1);
}

#[test]
fn statements_within_a_transaction_number_are_tracked_separately() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let lsid = SessionId::new();

    let first = cluster
        .insert(&ns, doc(1, 1), WriteConcern::Majority, Some(statement(lsid, 1, 0)))
        .unwrap();
    let second = cluster
        .insert(&ns, doc(2, 2), WriteConcern::Majority, Some(statement(lsid, 1, 1)))
        .unwrap();
    assert_ne!(first.optime, second.optime);

    // Retrying either statement replays its own result.
    assert_eq!(
        cluster
            .insert(&ns, doc(1, 1), WriteConcern::Majority, Some(statement(lsid, 1, 0)))
            .unwrap(),
        first
    );
    assert_eq!(
        cluster
            .insert(&ns, doc(2, 2), WriteConcern::Majority, Some(statement(lsid, 1, 1)))
            .unwrap(),
        second
    );
}

#[test]
fn a_superseded_transaction_number_can_no_longer_retry() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let lsid = SessionId::new();

    cluster
        .insert(&ns, doc(1, 1), WriteConcern::Majority, Some(statement(lsid, 1, 0)))
        .unwrap();
    cluster
        .insert(&ns, doc(2, 2), WriteConcern::Majority, Some(statement(lsid, 2, 0)))
        .unwrap();

    let err = cluster
        .insert(&ns, doc(3, 3), WriteConcern::Majority, Some(statement(lsid, 1, 1)))
        .unwrap_err();
    assert!(matches!(err, Error::IncompleteTransactionHistory(_)));
}

#[test]
fn a_missed_delete_does_not_reexecute_on_retry() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let info = statement(SessionId::new(), 1, 0);

    let first = cluster
        .delete(&ns, &tesseradb::DocumentId::int(1), WriteConcern::Majority, Some(info))
        .unwrap();
    assert_eq!(first.n, 0);

    // The id appears between the attempts.
    seed(&cluster, &ns, &[1]);

    let retried = cluster
        .delete(&ns, &tesseradb::DocumentId::int(1), WriteConcern::Majority, Some(info))
        .unwrap();
    assert_eq!(retried, first);
    assert_eq!(cluster.find(&ns, &Filter::default()).unwrap().len(), 1);
}

#[test]
fn a_missed_find_and_modify_stays_a_miss_on_retry() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let info = statement(SessionId::new(), 1, 0);
    let set = vec![("n".to_string(), serde_json::json!(99))];

    let first = cluster
        .find_and_modify(
            &ns,
            &tesseradb::DocumentId::int(5),
            &set,
            ReturnImage::Post,
            WriteConcern::Majority,
            Some(info),
        )
        .unwrap();
    assert!(first.is_none());

    seed(&cluster, &ns, &[5]);

    let retried = cluster
        .find_and_modify(
            &ns,
            &tesseradb::DocumentId::int(5),
            &set,
            ReturnImage::Post,
            WriteConcern::Majority,
            Some(info),
        )
        .unwrap();
    assert!(retried.is_none());
    // The document that arrived in between is untouched.
    let doc = cluster
        .find_by_id(&ns, &tesseradb::DocumentId::int(5))
        .unwrap()
        .unwrap();
    assert_eq!(doc.get_key("n"), Some(tesseradb::KeyValue::Int(5)));
}

#[test]
fn find_and_modify_retry_returns_the_first_image() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    seed(&cluster, &ns, &[1]);
    let info = statement(SessionId::new(), 1, 0);
    let set = vec![("n".to_string(), serde_json::json!(10))];

    let first = cluster
        .find_and_modify(
            &ns,
            &tesseradb::DocumentId::int(1),
            &set,
            ReturnImage::Post,
            WriteConcern::Majority,
            Some(info),
        )
        .unwrap();

    // A later unrelated write changes the document.
    cluster
        .update(&ns, doc(1, 20), WriteConcern::Majority, None)
        .unwrap();

    let retried = cluster
        .find_and_modify(
            &ns,
            &tesseradb::DocumentId::int(1),
            &set,
            ReturnImage::Post,
            WriteConcern::Majority,
            Some(info),
        )
        .unwrap();
    assert_eq!(retried, first);
}
