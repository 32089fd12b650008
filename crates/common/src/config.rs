/*
 * Configuration for the bucketed compaction planner.
 */

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{PlannerError, Result};

/// Storage id of the engine's default tier.
pub const DEFAULT_TIER: &str = "__DEFAULT";

/// How bucket weights are derived from the pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightPolicy {
    /// Threshold-gated weights (production behaviour)
    #[default]
    Normal,
    /// Any bucket with more than one mergeable portion gets a weight
    ForceCompact,
    /// Every bucket weighs zero, nothing is ever scheduled
    DisableCompact,
}

/// Configuration for compaction planning.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
pub struct PlannerConfig {
    /// Portions younger than this are still settling (default: 300s)
    pub freshness_window: Duration,

    /// Portions below this size never become bucket anchors (default: 1MB)
    pub small_portion_threshold_bytes: u64,

    /// Final buckets qualify once their actual bytes exceed this (default: 32MB)
    pub size_threshold_bytes: u64,

    /// Final buckets qualify once their actual portion count exceeds this
    pub count_threshold: u64,

    /// Final buckets qualify once their actual record count exceeds this
    pub records_threshold: u64,

    /// Per-portion weight factor; large enough that count dominates bytes
    pub weight_count_factor: i64,

    /// Multiplier applied to buckets that still have a next border
    pub non_final_multiplier: i64,

    /// Weight policy
    pub weight_policy: WeightPolicy,

    /// Tier managed by the planner; portions on other tiers are ignored
    pub default_tier: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(300),
            small_portion_threshold_bytes: 1 << 20, // 1MB
            size_threshold_bytes: 32 * 1024 * 1024, // 32MB
            count_threshold: 100,
            records_threshold: 100_000,
            weight_count_factor: 10_000_000_000,
            non_final_multiplier: 10,
            weight_policy: WeightPolicy::Normal,
            default_tier: DEFAULT_TIER.to_string(),
        }
    }
}

impl PlannerConfig {
    /// Checks that the tuning parameters can produce meaningful weights.
    pub fn validate(&self) -> Result<()> {
        if self.weight_count_factor <= 0 {
            return Err(PlannerError::InvalidConfiguration(format!(
                "weight_count_factor must be positive, got {}",
                self.weight_count_factor
            )));
        }
        if self.non_final_multiplier < 1 {
            return Err(PlannerError::InvalidConfiguration(format!(
                "non_final_multiplier must be at least 1, got {}",
                self.non_final_multiplier
            )));
        }
        if self.freshness_window.as_millis() > i64::MAX as u128 {
            return Err(PlannerError::InvalidConfiguration(format!(
                "freshness_window {:?} is out of range",
                self.freshness_window
            )));
        }
        Ok(())
    }

    /// Returns true if a portion on `tier` is managed by the planner.
    ///
    /// Untagged portions and the empty tier name count as the default tier.
    pub fn manages_tier(&self, tier: Option<&str>) -> bool {
        match tier {
            None | Some("") => true,
            Some(name) => name == self.default_tier,
        }
    }
}

/// Limits forwarded verbatim to the merge executor with every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionLimits {
    /// Upper bound on a single output granule (default: 1GB)
    pub granule_size_limit_bytes: u64,

    /// Output portions are cut once they reach this size (default: 4MB)
    pub split_output_bytes: u64,

    /// Executor-side cap on portions per merge; the planner does not apply it
    pub max_portions_per_task: usize,
}

impl Default for CompactionLimits {
    fn default() -> Self {
        Self {
            granule_size_limit_bytes: 1024 * 1024 * 1024, // 1GB
            split_output_bytes: 4 * 1024 * 1024,           // 4MB
            max_portions_per_task: 1000,
        }
    }
}
