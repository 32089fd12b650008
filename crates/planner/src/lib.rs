/*
 * Bucketed Compaction Planner
 *
 * The planner is responsible for:
 * 1. Partitioning a path's key space into buckets around large portions
 * 2. Classifying the remaining portions by freshness and future border
 * 3. Rating buckets and picking the heaviest for the next merge
 * 4. Describing that merge as a CompactionTask for the executor
 */

pub mod bucket;
pub mod buckets;
pub mod context;
pub mod freshness;
pub mod optimizer;
pub mod pool;
pub mod task_builder;

pub use bucket::{PortionsBucket, TaskDraft};
pub use buckets::{BucketSlot, BucketSnapshot, IndexSnapshot, PortionBuckets};
pub use context::PlannerContext;
pub use freshness::FreshnessWindow;
pub use optimizer::{OptimizationPriority, OptimizerPlanner};
pub use pool::{PoolSnapshot, PortionsPool};
pub use task_builder::TaskBuilder;

// Re-export the task types for convenience
pub use compaction_proto::{Checkpoint, CompactionTask};
