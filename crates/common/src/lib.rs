/*
 * Bucketed Compaction Planner - Common Types
 *
 * Portion model, configuration, errors and counters shared by the
 * planner and the task protocol.
 */

pub mod config;
pub mod error;
pub mod metrics;
pub mod portion;

pub use config::*;
pub use error::{PlannerError, Result, ResultExt};
pub use metrics::{CategorySnapshot, CountersSnapshot, PlannerCounters, PortionCategoryGauge};
pub use portion::{PortionGroupStats, PortionId, PortionInfo, PrimaryKey, ProducedKind};
