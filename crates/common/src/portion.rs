/*
 * Portion: an immutable, durable unit of columnar data covering a
 * primary-key range.
 *
 * Portions are owned by the storage engine. The planner keeps shared,
 * read-only references and never mutates them.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key type of the partition's primary-key ordering.
pub trait PrimaryKey: Ord + Clone + fmt::Debug + Serialize + Send + Sync + 'static {}

impl<T> PrimaryKey for T where T: Ord + Clone + fmt::Debug + Serialize + Send + Sync + 'static {}

/// Stable identifier of a portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortionId(pub u64);

impl fmt::Display for PortionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the portion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducedKind {
    /// Written directly by ingestion
    Inserted,
    /// Output of a previous merge
    Compacted,
}

/// Metadata the planner needs about a portion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortionInfo<K> {
    /// Portion id
    pub id: PortionId,
    /// First key (inclusive)
    pub key_start: K,
    /// Last key (inclusive)
    pub key_end: K,
    /// Blob bytes
    pub byte_size: u64,
    /// Row count
    pub row_count: u64,
    /// Commit time of the snapshot that produced the portion
    pub commit_time: DateTime<Utc>,
    /// Ingestion or compaction output
    pub produced: ProducedKind,
    /// Storage tier (None means the default tier)
    pub tier: Option<String>,
}

impl<K: PrimaryKey> PortionInfo<K> {
    /// Creates a compacted, default-tier portion.
    pub fn new(
        id: u64,
        key_start: K,
        key_end: K,
        byte_size: u64,
        row_count: u64,
        commit_time: DateTime<Utc>,
    ) -> Self {
        debug_assert!(key_start <= key_end, "portion {} has an inverted key range", id);
        Self {
            id: PortionId(id),
            key_start,
            key_end,
            byte_size,
            row_count,
            commit_time,
            produced: ProducedKind::Compacted,
            tier: None,
        }
    }

    /// Sets the produced kind.
    pub fn with_produced(mut self, produced: ProducedKind) -> Self {
        self.produced = produced;
        self
    }

    /// Sets the storage tier.
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    /// Returns true if the key ranges of both portions intersect.
    pub fn crosses(&self, other: &PortionInfo<K>) -> bool {
        self.crosses_range(&other.key_start, &other.key_end)
    }

    /// Returns true if the portion intersects `[from, to]`.
    pub fn crosses_range(&self, from: &K, to: &K) -> bool {
        !(self.key_end < *from || *to < self.key_start)
    }

    pub fn is_small(&self, threshold_bytes: u64) -> bool {
        self.byte_size < threshold_bytes
    }

    pub fn debug_string(&self) -> String {
        format!(
            "(id={};{:?}:{:?};bytes={};rows={};commit={};{:?})",
            self.id,
            self.key_start,
            self.key_end,
            self.byte_size,
            self.row_count,
            self.commit_time.timestamp_millis(),
            self.produced
        )
    }
}

/// Aggregate statistics over a set of portions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortionGroupStats {
    pub bytes: u64,
    pub count: u64,
    pub records: u64,
}

impl PortionGroupStats {
    pub fn add<K>(&mut self, portion: &PortionInfo<K>) {
        self.bytes += portion.byte_size;
        self.count += 1;
        self.records += portion.row_count;
    }

    /// Panics if the portion was never accounted for.
    pub fn remove<K>(&mut self, portion: &PortionInfo<K>) {
        self.bytes = self
            .bytes
            .checked_sub(portion.byte_size)
            .unwrap_or_else(|| panic!("group bytes underflow removing portion {}", portion.id));
        self.count = self
            .count
            .checked_sub(1)
            .unwrap_or_else(|| panic!("group count underflow removing portion {}", portion.id));
        self.records = self
            .records
            .checked_sub(portion.row_count)
            .unwrap_or_else(|| panic!("group records underflow removing portion {}", portion.id));
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn debug_string(&self) -> String {
        format!(
            "{{bytes={};count={};records={}}}",
            self.bytes, self.count, self.records
        )
    }
}
