//! Replication integration suite.
//!
//! End-to-end behavior of replica sets under the cluster: write concern
//! enforcement, commit point movement, forced elections, and restart
//! recovery. Per-entry apply and oplog mechanics are unit-tested in
//! crates/repl/src/.

#[path = "../common/mod.rs"]
mod common;

mod elections;
mod majority_commit;
mod recovery;
