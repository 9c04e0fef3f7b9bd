//! Resume semantics: exact replay, opaque tokens, lost history.

use crate::common::*;
use tesseradb::changestream::{ResumeToken, StreamScope};
use tesseradb::{
    Cluster, ClusterConfig, DocumentId, Error, ReplConfig, WriteConcern,
};

#[test]
fn resume_replays_exactly_the_events_after_the_token() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    split_and_move(&cluster, &ns, 50);

    let mut stream = cluster.watch(&ns);
    seed(&cluster, &ns, &[10, 60, 20, 70, 30]);
    let events = stream.next_batch().unwrap();
    assert_eq!(events.len(), 5);

    let resume_point = events[1].token.clone();
    let expected: Vec<_> = events[2..].iter().map(|e| e.id.clone()).collect();

    let mut resumed = cluster
        .watch_resume(StreamScope::Collection(ns.clone()), resume_point)
        .unwrap();
    let replayed = resumed.next_batch().unwrap();
    assert_eq!(
        replayed.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        expected
    );

    // New writes keep flowing on the resumed cursor.
    seed(&cluster, &ns, &[99]);
    let tail = resumed.next_batch().unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, Some(DocumentId::int(99)));
}

#[test]
fn tokens_survive_the_opaque_text_form() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let mut stream = cluster.watch(&ns);
    seed(&cluster, &ns, &[1, 2, 3]);
    let events = stream.next_batch().unwrap();

    let text = events[0].token.encode();
    let token = ResumeToken::decode(&text).unwrap();
    assert_eq!(token, events[0].token);

    let mut resumed = cluster
        .watch_resume(StreamScope::Collection(ns.clone()), token)
        .unwrap();
    assert_eq!(resumed.next_batch().unwrap().len(), 2);
}

#[test]
fn garbage_tokens_are_rejected() {
    assert!(matches!(
        ResumeToken::decode("not hex at all"),
        Err(Error::InvalidResumeToken(_))
    ));
}

#[test]
fn resume_works_across_a_chunk_move() {
    let cluster = small_cluster();
    let ns = shard_on_id(&cluster, "orders");
    let mut stream = cluster.watch(&ns);
    seed(&cluster, &ns, &[10, 60]);
    let events = stream.next_batch().unwrap();
    let token = events.last().unwrap().token.clone();

    split_and_move(&cluster, &ns, 50);
    seed(&cluster, &ns, &[20, 80]);

    let mut resumed = cluster
        .watch_resume(StreamScope::Collection(ns.clone()), token)
        .unwrap();
    let replayed = resumed.next_batch().unwrap();
    let mut ids: Vec<_> = replayed.iter().filter_map(|e| e.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, int_ids(&[20, 80]));
}

#[test]
fn trimmed_history_refuses_to_resume() {
    let cluster = Cluster::new(ClusterConfig {
        shard_count: 1,
        members_per_shard: 1,
        repl: ReplConfig {
            oplog_retention_entries: 2,
        },
        ..ClusterConfig::default()
    });
    let ns = shard_on_id(&cluster, "orders");
    let mut stream = cluster.watch(&ns);
    seed(&cluster, &ns, &[1]);
    let token = stream.next_batch().unwrap()[0].token.clone();

    seed(&cluster, &ns, &(2..30).collect::<Vec<_>>());
    let set = cluster.shard(0).set();
    set.trim_oplogs(set.majority_commit_point().ts);

    let err = cluster
        .watch_resume(StreamScope::Collection(ns.clone()), token)
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, Error::ChangeStreamHistoryLost));
}
