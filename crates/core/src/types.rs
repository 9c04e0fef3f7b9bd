//! Identity, time, and sharding types
//!
//! This module defines the types that name things and order things:
//! - NamespaceId: database + collection name
//! - ClusterTime / OpTime: logical timestamps and oplog positions
//! - ShardId, ShardKey, ShardKeyPattern, ChunkRange, ShardVersion
//! - SessionId / TxnNumber / StmtId: retryable-write identity

use crate::document::{Document, KeyValue};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Fully qualified collection name: `db.coll`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId {
    /// Database name
    pub db: String,
    /// Collection name
    pub coll: String,
}

impl NamespaceId {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Parse from the `db.coll` form. The first dot splits db from coll;
    /// collection names may themselves contain dots.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(Error::InvalidNamespace(s.to_string())),
        }
    }

    /// True for namespaces owned by the system (`admin`, `config`, `local`).
    pub fn is_system(&self) -> bool {
        matches!(self.db.as_str(), "admin" | "config" | "local")
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Logical cluster timestamp: (seconds, increment)
///
/// Totally ordered, monotonically advancing. The increment disambiguates
/// multiple events within one second. This is the clock oplog entries,
/// snapshots, and resume tokens are stamped with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ClusterTime {
    pub secs: u32,
    pub inc: u32,
}

impl ClusterTime {
    pub const ZERO: ClusterTime = ClusterTime { secs: 0, inc: 0 };

    pub fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    /// The smallest ClusterTime strictly greater than `self`.
    pub fn next_tick(self) -> Self {
        match self.inc.checked_add(1) {
            Some(inc) => Self {
                secs: self.secs,
                inc,
            },
            None => Self {
                secs: self.secs + 1,
                inc: 0,
            },
        }
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

impl fmt::Display for ClusterTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.secs, self.inc)
    }
}

/// Position in the oplog: cluster time plus the primary's term
///
/// Feed order (change streams, secondary application) is by `ts` alone;
/// durability decisions compare `(term, ts)` so that entries written by a
/// deposed primary lose to entries from a newer term.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OpTime {
    pub term: u64,
    pub ts: ClusterTime,
}

impl OpTime {
    pub const ZERO: OpTime = OpTime {
        term: 0,
        ts: ClusterTime::ZERO,
    };

    pub fn new(term: u64, ts: ClusterTime) -> Self {
        Self { term, ts }
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}@{}", self.term, self.ts)
    }
}

/// Shard identifier (e.g. "shard0")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document identifier: the `_id` value
///
/// Wraps an ordered scalar. Equality and order are stable across
/// serialization, which makes `DocumentId` usable as a BTreeMap key in the
/// record store and as the tiebreaker inside resume tokens.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DocumentId(pub KeyValue);

impl DocumentId {
    /// Wrap a scalar as a document id. Sentinels are not valid ids.
    pub fn new(value: KeyValue) -> Result<Self> {
        if matches!(value, KeyValue::MinKey | KeyValue::MaxKey) {
            return Err(Error::InvalidId("MinKey/MaxKey cannot be an _id".into()));
        }
        Ok(Self(value))
    }

    pub fn int(v: i64) -> Self {
        Self(KeyValue::Int(v))
    }

    pub fn str(v: impl Into<String>) -> Self {
        Self(KeyValue::Str(v.into()))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extracted shard-key value: one `KeyValue` per pattern field
///
/// Ordered lexicographically, which matches the ordering of the chunk map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardKey(pub Vec<KeyValue>);

impl ShardKey {
    /// Key below every real key (the lower bound of the first chunk).
    pub fn global_min(fields: usize) -> Self {
        Self(vec![KeyValue::MinKey; fields.max(1)])
    }

    /// Key above every real key (the upper bound of the last chunk).
    pub fn global_max(fields: usize) -> Self {
        Self(vec![KeyValue::MaxKey; fields.max(1)])
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "}}")
    }
}

/// Shard key pattern: the ordered list of document fields the key is built from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardKeyPattern {
    pub fields: Vec<String>,
}

impl ShardKeyPattern {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Single-field pattern, the common case (`{_id: 1}` style).
    pub fn on(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
        }
    }

    /// Extract the shard key from a document.
    ///
    /// Every pattern field must be present and scalar; a document that
    /// cannot produce a full key is not routable.
    pub fn extract(&self, doc: &Document) -> Result<ShardKey> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = doc
                .get_key(field)
                .ok_or_else(|| Error::ShardKeyNotFound(field.clone()))?;
            values.push(value);
        }
        Ok(ShardKey(values))
    }
}

/// Contiguous shard-key range: `min` inclusive, `max` exclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub min: ShardKey,
    pub max: ShardKey,
}

impl ChunkRange {
    pub fn new(min: ShardKey, max: ShardKey) -> Self {
        Self { min, max }
    }

    /// The full key space for a pattern with `fields` components.
    pub fn full(fields: usize) -> Self {
        Self {
            min: ShardKey::global_min(fields),
            max: ShardKey::global_max(fields),
        }
    }

    pub fn contains(&self, key: &ShardKey) -> bool {
        &self.min <= key && key < &self.max
    }

    /// True when `other` lies entirely inside this range.
    pub fn covers(&self, other: &ChunkRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// Collection placement version: epoch plus (major, minor)
///
/// The epoch changes when the collection's routing identity changes (drop
/// and recreate, reshard). Major bumps on chunk moves, minor on splits and
/// merges. A router and a shard agree on placement iff epochs match and the
/// router's version is not behind the shard's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardVersion {
    pub epoch: Uuid,
    pub major: u32,
    pub minor: u32,
}

impl ShardVersion {
    pub fn initial(epoch: Uuid) -> Self {
        Self {
            epoch,
            major: 1,
            minor: 0,
        }
    }

    pub fn bump_major(self) -> Self {
        Self {
            epoch: self.epoch,
            major: self.major + 1,
            minor: 0,
        }
    }

    pub fn bump_minor(self) -> Self {
        Self {
            epoch: self.epoch,
            major: self.major,
            minor: self.minor + 1,
        }
    }

    /// Comparable only within one epoch.
    pub fn newer_than(&self, other: &ShardVersion) -> bool {
        self.epoch == other.epoch && (self.major, self.minor) > (other.major, other.minor)
    }
}

impl fmt::Display for ShardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{} ({})", self.major, self.minor, self.epoch)
    }
}

/// Logical session identifier (`lsid`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction number within a session. Monotone per session; a retry of a
/// retryable write reuses the same number.
pub type TxnNumber = u64;

/// Statement id within a retryable write batch.
pub type StmtId = u32;
