/*
 * Error types for the compaction planner.
 *
 * The planner has almost no recoverable failure surface:
 * - Bookkeeping desynchronisation (duplicate add, unknown remove, broken
 *   category disjointness) is a programming error and panics.
 * - Busy portions and "nothing to do" are signalled with None / zero priority.
 * - What remains is configuration validation and JSON snapshotting.
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PlannerError {
    /// Wraps this error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match self {
            PlannerError::InvalidConfiguration(msg) => {
                PlannerError::InvalidConfiguration(format!("{}: {}", ctx, msg))
            }
            PlannerError::Serialization(msg) => {
                PlannerError::Serialization(format!("{}: {}", ctx, msg))
            }
        }
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(e: serde_json::Error) -> Self {
        PlannerError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Adds context lazily (only evaluated on error).
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
