/*
 * Task builder for turning bucket selections into compaction tasks.
 */

use compaction_common::{CompactionLimits, PrimaryKey};
use compaction_proto::CompactionTask;
use uuid::Uuid;

use crate::bucket::TaskDraft;

/// Builds CompactionTasks for one path.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    path_id: u64,
    limits: CompactionLimits,
}

impl TaskBuilder {
    pub fn new(path_id: u64) -> Self {
        Self {
            path_id,
            limits: CompactionLimits::default(),
        }
    }

    /// Sets the limits attached to tasks built by this builder.
    pub fn with_limits(mut self, limits: CompactionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builds a CompactionTask from a bucket's selection.
    pub fn build_task<K: PrimaryKey>(&self, draft: TaskDraft<K>) -> CompactionTask<K> {
        CompactionTask {
            task_id: Uuid::now_v7(),
            path_id: self.path_id,
            portions: draft
                .portions
                .iter()
                .map(|portion| portion.as_ref().clone())
                .collect(),
            checkpoints: draft.checkpoints,
            limits: self.limits.clone(),
            total_bytes: draft.total_bytes,
            is_final: draft.is_final,
            stop_instant: draft.stop_instant,
        }
    }
}
