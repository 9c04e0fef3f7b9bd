//! Plan caching behavior through the cluster find path.

use crate::common::*;
use tesseradb::planner::Plan;
use tesseradb::{
    Clause, Cluster, ClusterConfig, CmpOp, Filter, KeyValue, NamespaceId, WriteConcern,
};

fn one_shard_cluster() -> Cluster {
    Cluster::new(ClusterConfig {
        shard_count: 1,
        members_per_shard: 1,
        ..ClusterConfig::default()
    })
}

fn seed_mod10(cluster: &Cluster, ns: &NamespaceId, count: i64) {
    for i in 0..count {
        cluster
            .insert(ns, doc(i, i % 10), WriteConcern::Majority, None)
            .unwrap();
    }
}

fn eq_n(v: i64) -> Filter {
    Filter::new(vec![Clause::new("n", CmpOp::Eq, KeyValue::Int(v))])
}

#[test]
fn selective_filter_settles_on_an_index_scan() {
    let cluster = one_shard_cluster();
    let ns = shard_on_id(&cluster, "orders");
    seed_mod10(&cluster, &ns, 100);
    cluster.create_index(&ns, "n").unwrap();

    assert_eq!(cluster.find(&ns, &eq_n(3)).unwrap().len(), 10);

    let planner = cluster.shard(0).planner(&ns);
    let cached = planner.cache().get(&eq_n(3).shape()).unwrap();
    assert_eq!(
        cached.plan,
        Plan::IxScan {
            field: "n".to_string()
        }
    );
}

#[test]
fn different_constants_reuse_one_cache_entry() {
    let cluster = one_shard_cluster();
    let ns = shard_on_id(&cluster, "orders");
    seed_mod10(&cluster, &ns, 100);
    cluster.create_index(&ns, "n").unwrap();

    assert_eq!(cluster.find(&ns, &eq_n(3)).unwrap().len(), 10);
    assert_eq!(cluster.find(&ns, &eq_n(7)).unwrap().len(), 10);
    assert_eq!(cluster.shard(0).planner(&ns).cache().len(), 1);
}

#[test]
fn dropping_the_index_clears_plans_that_used_it() {
    let cluster = one_shard_cluster();
    let ns = shard_on_id(&cluster, "orders");
    seed_mod10(&cluster, &ns, 100);
    cluster.create_index(&ns, "n").unwrap();
    cluster.find(&ns, &eq_n(3)).unwrap();
    assert_eq!(cluster.shard(0).planner(&ns).cache().len(), 1);

    cluster.drop_index(&ns, "n").unwrap();
    assert_eq!(cluster.shard(0).planner(&ns).cache().len(), 0);

    // Still answerable, now by collection scan.
    assert_eq!(cluster.find(&ns, &eq_n(3)).unwrap().len(), 10);
    let cached = cluster
        .shard(0)
        .planner(&ns)
        .cache()
        .get(&eq_n(3).shape())
        .unwrap();
    assert_eq!(cached.plan, Plan::CollScan);
}

#[test]
fn data_shift_forces_a_replan() {
    let cluster = one_shard_cluster();
    let ns = shard_on_id(&cluster, "orders");
    seed_mod10(&cluster, &ns, 100);
    cluster.create_index(&ns, "n").unwrap();

    cluster.find(&ns, &eq_n(0)).unwrap();
    let planner = cluster.shard(0).planner(&ns);
    let cheap = planner.cache().get(&eq_n(0).shape()).unwrap();

    // The indexed value goes from rare to dominant.
    for i in 1000..1400 {
        cluster
            .insert(&ns, doc(i, 0), WriteConcern::Majority, None)
            .unwrap();
    }

    assert_eq!(cluster.find(&ns, &eq_n(0)).unwrap().len(), 410);
    let replanned = planner.cache().get(&eq_n(0).shape()).unwrap();
    assert!(
        replanned.works > cheap.works,
        "cache entry was not refreshed: {} <= {}",
        replanned.works,
        cheap.works
    );
}

#[test]
fn sorted_results_come_back_in_field_order() {
    let cluster = one_shard_cluster();
    let ns = shard_on_id(&cluster, "orders");
    for (id, n) in [(1, 9), (2, 4), (3, 7), (4, 1)] {
        cluster
            .insert(&ns, doc(id, n), WriteConcern::Majority, None)
            .unwrap();
    }

    let sorted = cluster
        .find(&ns, &Filter::default().sorted_by("n"))
        .unwrap();
    assert_eq!(ids_of(&sorted), int_ids(&[4, 2, 3, 1]));
}
