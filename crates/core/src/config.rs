//! Configuration structs
//!
//! Plain serde structs with defaults. Each layer takes its own config; the
//! engine composes them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum attempts for a write-conflict retry loop before giving up.
    pub write_conflict_retries: u32,
    /// History retained below the stable timestamp, in logical seconds.
    /// Bounds how far back snapshots (and pre-images) can read.
    pub history_window_secs: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_conflict_retries: 16,
            history_window_secs: 300,
        }
    }
}

/// Replication tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplConfig {
    /// Number of oplog entries retained above the stable timestamp floor.
    /// Trimming never goes past the stable timestamp regardless.
    pub oplog_retention_entries: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            oplog_retention_entries: 10_000,
        }
    }
}

/// Chunk balancer / migration tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Documents transferred per clone batch.
    pub clone_batch_size: usize,
    /// Upper bound on time spent inside the donor critical section.
    #[serde(with = "duration_millis")]
    pub critical_section_timeout: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            clone_batch_size: 128,
            critical_section_timeout: Duration::from_secs(10),
        }
    }
}

/// Cluster feature compatibility version.
///
/// Gates behavior that older deployments of the same cluster cannot
/// understand yet. Today the only gated surface is how much detail a
/// collection-drop change event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureCompatibility {
    /// Previous release semantics.
    Legacy,
    /// Current release semantics.
    Current,
}

impl Default for FeatureCompatibility {
    fn default() -> Self {
        Self::Current
    }
}

/// Query planner tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Work units granted to each candidate during trial ranking.
    pub trial_works_budget: u64,
    /// A cached plan is evicted and replanned when its execution exceeds
    /// `cached_works * eviction_ratio` without finishing.
    pub eviction_ratio: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            trial_works_budget: 512,
            eviction_ratio: 10,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
