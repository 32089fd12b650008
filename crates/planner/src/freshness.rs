/*
 * Freshness classification.
 *
 * A portion committed less than the freshness window ago may still get
 * siblings that would be misordered if it were merged now.
 */

use chrono::{DateTime, Utc};
use compaction_common::{PlannerError, Result};

/// The engine-wide freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    window: chrono::Duration,
}

impl FreshnessWindow {
    pub fn new(window: std::time::Duration) -> Result<Self> {
        let window = chrono::Duration::from_std(window).map_err(|e| {
            PlannerError::InvalidConfiguration(format!("freshness window {:?}: {}", window, e))
        })?;
        Ok(Self { window })
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    /// `now - commit_time < F`. Commit times ahead of `now` are fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, commit_time: DateTime<Utc>) -> bool {
        now.signed_duration_since(commit_time) < self.window
    }

    pub fn is_settled(&self, now: DateTime<Utc>, instant: DateTime<Utc>) -> bool {
        !self.is_fresh(now, instant)
    }
}
