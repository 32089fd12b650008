/*
 * State shared by every bucket and pool of one planner.
 */

use std::sync::Arc;

use compaction_common::{PlannerConfig, PlannerCounters, Result, ResultExt};

use crate::freshness::FreshnessWindow;

/// Validated configuration plus the planner's counters.
#[derive(Debug)]
pub struct PlannerContext {
    pub config: PlannerConfig,
    pub freshness: FreshnessWindow,
    pub counters: Arc<PlannerCounters>,
}

impl PlannerContext {
    pub fn new(config: PlannerConfig, counters: Arc<PlannerCounters>) -> Result<Arc<Self>> {
        config.validate().context("planner config")?;
        let freshness = FreshnessWindow::new(config.freshness_window).context("planner config")?;
        Ok(Arc::new(Self {
            config,
            freshness,
            counters,
        }))
    }
}
