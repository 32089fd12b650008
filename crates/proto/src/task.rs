/*
 * Task definitions for compaction.
 *
 * A CompactionTask is what the planner hands to the merge executor.
 * It is a snapshot-in-time recommendation: if any of its portions is
 * retired before execution the caller discards it.
 */

use chrono::{DateTime, Utc};
use compaction_common::{CompactionLimits, PortionId, PortionInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A key position at which the merge output must be split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint<K> {
    /// Split key
    pub key: K,

    /// True for anchor bounds (the key belongs to the segment being cut),
    /// false for the stop point (the key starts the next segment)
    pub include_anchor_bound: bool,
}

impl<K> Checkpoint<K> {
    pub fn anchor_bound(key: K) -> Self {
        Self {
            key,
            include_anchor_bound: true,
        }
    }

    pub fn stop_point(key: K) -> Self {
        Self {
            key,
            include_anchor_bound: false,
        }
    }
}

/// A compaction task to be executed by a merge executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionTask<K> {
    /// Unique task ID
    pub task_id: Uuid,

    /// Partition (path) this task belongs to
    pub path_id: u64,

    /// Portions to merge
    pub portions: Vec<PortionInfo<K>>,

    /// Split points of the merge output, in the order they were derived
    pub checkpoints: Vec<Checkpoint<K>>,

    /// Limits supplied by the scheduler
    pub limits: CompactionLimits,

    /// Sum of input portion bytes
    pub total_bytes: u64,

    /// True if the bucket had no next border when the task was built
    pub is_final: bool,

    /// Commit time of the oldest still-fresh portion of a final bucket
    pub stop_instant: Option<DateTime<Utc>>,
}

impl<K> CompactionTask<K> {
    /// Returns the ids of the input portions.
    pub fn portion_ids(&self) -> Vec<PortionId> {
        self.portions.iter().map(|p| p.id).collect()
    }

    pub fn portion_count(&self) -> usize {
        self.portions.len()
    }

    /// Returns true if the task merges the given portion.
    pub fn contains(&self, id: PortionId) -> bool {
        self.portions.iter().any(|p| p.id == id)
    }
}
