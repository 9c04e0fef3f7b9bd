//! Restart recovery of durable replica sets.

use crate::common::*;
use tesseradb::repl::{command_body, CommandKind, EntryBody, OpKind, ReplicaSet, WriteConcern};
use tesseradb::{NamespaceId, ReplConfig, StorageConfig};
use uuid::Uuid;

fn open(dir: &std::path::Path) -> ReplicaSet {
    ReplicaSet::open(
        "rs0",
        dir,
        3,
        StorageConfig::default(),
        ReplConfig::default(),
    )
    .unwrap()
}

fn seed_durable(set: &ReplicaSet, collection: &NamespaceId, ui: Uuid, ids: std::ops::Range<i64>) {
    for id in ids {
        set.write(
            vec![EntryBody {
                ns: collection.clone(),
                ui,
                op: OpKind::Insert { doc: doc(id, id) },
                from_migrate: false,
                session: None,
            }],
            WriteConcern::Majority,
        )
        .unwrap();
    }
}

#[test]
fn restart_replays_the_whole_oplog() {
    let dir = tempfile::tempdir().unwrap();
    let collection = ns("events");
    let ui = Uuid::new_v4();
    let last = {
        let set = open(dir.path());
        set.write(
            vec![command_body(collection.clone(), ui, CommandKind::CreateCollection)],
            WriteConcern::Majority,
        )
        .unwrap();
        seed_durable(&set, &collection, ui, 0..5);
        set.last_applied(0)
    };

    let set = open(dir.path());
    assert_eq!(set.last_applied(0), last);
    let docs = set
        .primary_engine()
        .scan_at(&collection, last.ts)
        .unwrap();
    assert_eq!(ids_of(&docs), int_ids(&[0, 1, 2, 3, 4]));
}

#[test]
fn checkpoint_shortens_replay_but_not_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let collection = ns("events");
    let ui = Uuid::new_v4();
    {
        let set = open(dir.path());
        set.write(
            vec![command_body(collection.clone(), ui, CommandKind::CreateCollection)],
            WriteConcern::Majority,
        )
        .unwrap();
        seed_durable(&set, &collection, ui, 0..10);
        for i in 0..set.member_count() {
            set.engine(i).checkpoint().unwrap();
        }
        seed_durable(&set, &collection, ui, 10..15);
    }

    let set = open(dir.path());
    let docs = set
        .primary_engine()
        .scan_at(&collection, set.last_applied(0).ts)
        .unwrap();
    assert_eq!(docs.len(), 15);
}

#[test]
fn reopening_twice_lands_in_the_same_state() {
    let dir = tempfile::tempdir().unwrap();
    let collection = ns("events");
    let ui = Uuid::new_v4();
    {
        let set = open(dir.path());
        set.write(
            vec![command_body(collection.clone(), ui, CommandKind::CreateCollection)],
            WriteConcern::Majority,
        )
        .unwrap();
        seed_durable(&set, &collection, ui, 0..8);
    }

    let first = {
        let set = open(dir.path());
        (set.last_applied(0), set.primary_oplog().len())
    };
    let set = open(dir.path());
    assert_eq!((set.last_applied(0), set.primary_oplog().len()), first);
    assert_eq!(
        set.primary_engine()
            .count_at(&collection, set.last_applied(0).ts)
            .unwrap(),
        8
    );
}
