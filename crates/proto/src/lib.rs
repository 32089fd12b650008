/*
 * Protocol definitions for planner -> merge executor hand-off.
 */

pub mod task;

// Re-export task types at the crate root
pub use task::*;
