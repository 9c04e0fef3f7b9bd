//! Resumable change streams
//!
//! A change stream is a cursor over majority-committed oplog entries,
//! translated into client-facing events. Every event carries a resume
//! token; reopening a stream with `resume_after` replays exactly the
//! events past that token, as long as the oplog still retains it.
//!
//! Cluster-wide streams merge the per-shard feeds into one sequence
//! ordered by resume token.

pub mod event;
pub mod stream;
pub mod token;

pub use event::{ChangeEvent, EventKind, UpdateDescription};
pub use stream::{ChangeStream, ClusterChangeStream, StreamScope};
pub use token::ResumeToken;
