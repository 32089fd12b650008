/*
 * Optimizer planner: the per-path entry point.
 *
 * Owns one bucket index and exposes the calls the storage engine makes:
 * portion set changes, the periodic actualize tick, priority queries and
 * task requests. All calls for one path are expected to be serialized by
 * the caller.
 */

use chrono::{DateTime, Utc};
use compaction_common::{
    CompactionLimits, PlannerConfig, PlannerCounters, PortionId, PortionInfo, PrimaryKey, Result,
};
use compaction_proto::CompactionTask;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::buckets::PortionBuckets;
use crate::context::PlannerContext;
use crate::task_builder::TaskBuilder;

/// Urgency of compacting one path, comparable across paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum OptimizationPriority {
    /// Nothing worth merging
    Zero,
    /// Weight of the heaviest bucket
    Critical(i64),
}

impl OptimizationPriority {
    pub fn is_zero(&self) -> bool {
        matches!(self, OptimizationPriority::Zero)
    }

    pub fn weight(&self) -> i64 {
        match self {
            OptimizationPriority::Zero => 0,
            OptimizationPriority::Critical(weight) => *weight,
        }
    }
}

#[derive(Debug)]
pub struct OptimizerPlanner<K: PrimaryKey> {
    path_id: u64,
    buckets: PortionBuckets<K>,
    ctx: Arc<PlannerContext>,
}

impl<K: PrimaryKey> OptimizerPlanner<K> {
    /// Creates a planner with its own counters.
    pub fn new(path_id: u64, config: PlannerConfig) -> Result<Self> {
        Self::with_counters(path_id, config, Arc::new(PlannerCounters::new()))
    }

    /// Creates a planner reporting into shared counters. Tear it down with
    /// [`OptimizerPlanner::release`].
    pub fn with_counters(
        path_id: u64,
        config: PlannerConfig,
        counters: Arc<PlannerCounters>,
    ) -> Result<Self> {
        let ctx = PlannerContext::new(config, counters)?;
        Ok(Self {
            path_id,
            buckets: PortionBuckets::new(ctx.clone()),
            ctx,
        })
    }

    pub fn path_id(&self) -> u64 {
        self.path_id
    }

    pub fn counters(&self) -> &Arc<PlannerCounters> {
        &self.ctx.counters
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.ctx.config
    }

    pub fn buckets(&self) -> &PortionBuckets<K> {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Applies a change of the path's portion set at the current time.
    pub fn modify_portions(&mut self, added: &[Arc<PortionInfo<K>>], removed: &[Arc<PortionInfo<K>>]) {
        self.modify_portions_at(added, removed, Utc::now());
    }

    /// Applies a change of the path's portion set.
    ///
    /// Portions of other tiers are ignored. Additions are applied before
    /// removals.
    pub fn modify_portions_at(
        &mut self,
        added: &[Arc<PortionInfo<K>>],
        removed: &[Arc<PortionInfo<K>>],
        now: DateTime<Utc>,
    ) {
        let was_empty = self.buckets.is_empty();

        for portion in added {
            if !self.is_managed(portion) {
                continue;
            }
            self.buckets.add_portion(portion.clone(), now);
        }
        for portion in removed {
            if !self.is_managed(portion) {
                continue;
            }
            self.buckets.remove_portion(portion);
        }

        match (was_empty, self.buckets.is_empty()) {
            (true, false) => {
                info!(path_id = self.path_id, "Planner activated");
                self.ctx.counters.on_optimizer_activated();
            }
            (false, true) => {
                info!(path_id = self.path_id, "Planner deactivated");
                self.ctx.counters.on_optimizer_deactivated();
            }
            _ => {}
        }
    }

    /// Tears the planner down, taking its portions and its activation back
    /// out of the counters.
    ///
    /// Planners reporting into shared counters must be released, not just
    /// dropped, or the gauges keep their contribution.
    pub fn release(self) {
        if !self.buckets.is_empty() {
            self.ctx.counters.on_optimizer_deactivated();
        }
        info!(path_id = self.path_id, "Planner released");
        self.buckets.release();
    }

    fn is_managed(&self, portion: &PortionInfo<K>) -> bool {
        let managed = self.ctx.config.manages_tier(portion.tier.as_deref());
        if !managed {
            debug!(
                path_id = self.path_id,
                portion = %portion.id,
                tier = ?portion.tier,
                "Skipping portion of another tier"
            );
        }
        managed
    }

    /// Promotes settled portions; meant to be called periodically.
    pub fn actualize(&mut self, now: DateTime<Utc>) {
        self.buckets.actualize(now);
    }

    /// Returns the merge the planner recommends right now, if any.
    pub fn get_optimization_task(
        &self,
        limits: &CompactionLimits,
        busy_portions: &HashSet<PortionId>,
    ) -> Option<CompactionTask<K>> {
        let draft = self.buckets.build_optimization_task(busy_portions)?;
        let task = TaskBuilder::new(self.path_id)
            .with_limits(limits.clone())
            .build_task(draft);
        info!(
            path_id = self.path_id,
            task_id = %task.task_id,
            portions = task.portion_count(),
            bytes = task.total_bytes,
            is_final = task.is_final,
            "Built compaction task"
        );
        Some(task)
    }

    pub fn get_useful_metric(&self) -> OptimizationPriority {
        match self.buckets.weight() {
            weight if weight <= 0 => OptimizationPriority::Zero,
            weight => OptimizationPriority::Critical(weight),
        }
    }

    /// Anchor start keys of the path's buckets, in key order.
    pub fn bucket_positions(&self) -> Vec<K> {
        self.buckets.bucket_positions()
    }

    pub fn debug_string(&self) -> String {
        format!("path_id={};{}", self.path_id, self.buckets.debug_string())
    }

    pub fn serialize_to_json(&self) -> Result<serde_json::Value> {
        let index = serde_json::to_value(self.buckets.snapshot())?;
        Ok(serde_json::json!({
            "path_id": self.path_id,
            "priority": self.get_useful_metric(),
            "index": index,
        }))
    }
}
