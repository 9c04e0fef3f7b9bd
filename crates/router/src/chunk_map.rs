//! Chunk maps: an ordered partition of shard-key space
//!
//! A chunk is a contiguous shard-key range owned by exactly one shard. The
//! map covers the whole key space — from the MinKey sentinel to the MaxKey
//! sentinel — with no gaps or overlaps, and every structural change
//! preserves that. Versions are bumped by the catalog when it applies
//! splits, merges, and moves.

use serde::{Deserialize, Serialize};
use tessera_core::{ChunkRange, Error, Result, ShardId, ShardKey, ShardVersion};

/// One chunk: a range, its owner, and its placement version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub range: ChunkRange,
    pub shard: ShardId,
    pub version: ShardVersion,
}

/// Ordered, gapless chunk list for one collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMap {
    chunks: Vec<Chunk>,
}

impl ChunkMap {
    /// A single chunk spanning the whole key space.
    pub fn initial(fields: usize, shard: ShardId, version: ShardVersion) -> Self {
        Self {
            chunks: vec![Chunk {
                range: ChunkRange::full(fields),
                shard,
                version,
            }],
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The collection's placement version: the highest chunk version.
    pub fn collection_version(&self) -> ShardVersion {
        self.chunks
            .iter()
            .map(|c| c.version)
            .max_by_key(|v| (v.major, v.minor))
            .expect("chunk map is never empty")
    }

    /// Highest version among chunks owned by `shard`, if it owns any.
    pub fn shard_version(&self, shard: &ShardId) -> Option<ShardVersion> {
        self.chunks
            .iter()
            .filter(|c| &c.shard == shard)
            .map(|c| c.version)
            .max_by_key(|v| (v.major, v.minor))
    }

    /// The chunk owning `key`.
    pub fn find(&self, key: &ShardKey) -> &Chunk {
        // Last chunk whose min <= key; ranges are gapless so it owns key.
        let idx = self.chunks.partition_point(|c| c.range.min <= *key);
        &self.chunks[idx.saturating_sub(1)]
    }

    /// Shards owning any part of `range`, with the sub-range each owns.
    pub fn shards_for_range(&self, range: &ChunkRange) -> Vec<(ShardId, ChunkRange)> {
        self.chunks
            .iter()
            .filter(|c| c.range.min < range.max && range.min < c.range.max)
            .map(|c| {
                (
                    c.shard.clone(),
                    ChunkRange::new(
                        c.range.min.clone().max(range.min.clone()),
                        c.range.max.clone().min(range.max.clone()),
                    ),
                )
            })
            .collect()
    }

    /// Split the chunk containing `at` into `[min, at)` and `[at, max)`.
    /// Both halves get fresh minor versions above the collection version.
    pub fn split(&mut self, at: &ShardKey) -> Result<()> {
        let version = self.collection_version();
        let idx = self.chunks.partition_point(|c| c.range.min <= *at) - 1;
        let chunk = &self.chunks[idx];
        if chunk.range.min == *at || !chunk.range.contains(at) {
            return Err(Error::InvalidOperation(format!(
                "split key {at} is not strictly inside {}",
                chunk.range
            )));
        }
        let left_version = version.bump_minor();
        let right_version = left_version.bump_minor();
        let old = self.chunks[idx].clone();
        self.chunks[idx] = Chunk {
            range: ChunkRange::new(old.range.min.clone(), at.clone()),
            shard: old.shard.clone(),
            version: left_version,
        };
        self.chunks.insert(
            idx + 1,
            Chunk {
                range: ChunkRange::new(at.clone(), old.range.max),
                shard: old.shard,
                version: right_version,
            },
        );
        Ok(())
    }

    /// Merge the contiguous chunks covering `range` into one. All covered
    /// chunks must share an owner.
    pub fn merge(&mut self, range: &ChunkRange) -> Result<()> {
        let start = self
            .chunks
            .iter()
            .position(|c| c.range.min == range.min)
            .ok_or_else(|| {
                Error::InvalidOperation(format!("merge range {range} has no chunk boundary at min"))
            })?;
        let end = self
            .chunks
            .iter()
            .position(|c| c.range.max == range.max)
            .ok_or_else(|| {
                Error::InvalidOperation(format!("merge range {range} has no chunk boundary at max"))
            })?;
        if end < start {
            return Err(Error::InvalidOperation("inverted merge range".into()));
        }
        let owner = self.chunks[start].shard.clone();
        if self.chunks[start..=end].iter().any(|c| c.shard != owner) {
            return Err(Error::InvalidOperation(
                "merge range spans more than one shard".into(),
            ));
        }
        let version = self.collection_version().bump_minor();
        let merged = Chunk {
            range: range.clone(),
            shard: owner,
            version,
        };
        self.chunks.splice(start..=end, std::iter::once(merged));
        Ok(())
    }

    /// Reassign the chunk with exactly `range` to `to`, bumping the major
    /// version. Returns the moved chunk's new version.
    pub fn commit_move(&mut self, range: &ChunkRange, to: ShardId) -> Result<ShardVersion> {
        let version = self.collection_version().bump_major();
        let chunk = self
            .chunks
            .iter_mut()
            .find(|c| &c.range == range)
            .ok_or_else(|| {
                Error::InvalidOperation(format!("no chunk with exact range {range}"))
            })?;
        chunk.shard = to;
        chunk.version = version;
        Ok(version)
    }

    /// Structural invariant check used by tests: full coverage, no gaps,
    /// ordered mins.
    pub fn is_partition(&self) -> bool {
        if self.chunks.is_empty() {
            return false;
        }
        let fields = self.chunks[0].range.min.0.len();
        if self.chunks[0].range.min != ShardKey::global_min(fields) {
            return false;
        }
        if self.chunks[self.chunks.len() - 1].range.max != ShardKey::global_max(fields) {
            return false;
        }
        self.chunks
            .windows(2)
            .all(|w| w[0].range.max == w[1].range.min && w[0].range.min < w[0].range.max)
            && self
                .chunks
                .last()
                .map(|c| c.range.min < c.range.max)
                .unwrap_or(false)
    }
}
