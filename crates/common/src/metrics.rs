/*
 * Observability - planner counters
 *
 * Gauges describing how the planner currently classifies portions, plus a
 * few task counters. Purely informational: nothing in the planner reads
 * them back to make a decision.
 */

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::PortionInfo;

/// Count / bytes / rows gauge for one portion category.
#[derive(Debug, Default)]
pub struct PortionCategoryGauge {
    count: AtomicI64,
    bytes: AtomicI64,
    rows: AtomicI64,
}

impl PortionCategoryGauge {
    pub fn add_portion<K>(&self, portion: &PortionInfo<K>) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(portion.byte_size as i64, Ordering::Relaxed);
        self.rows.fetch_add(portion.row_count as i64, Ordering::Relaxed);
    }

    pub fn remove_portion<K>(&self, portion: &PortionInfo<K>) {
        self.count.fetch_sub(1, Ordering::Relaxed);
        self.bytes
            .fetch_sub(portion.byte_size as i64, Ordering::Relaxed);
        self.rows.fetch_sub(portion.row_count as i64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CategorySnapshot {
        CategorySnapshot {
            count: self.count.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
        }
    }
}

/// Counters shared by every bucket and pool of one planner.
#[derive(Debug, Default)]
pub struct PlannerCounters {
    // Pool categories
    pub actual_portions: PortionCategoryGauge,
    pub future_portions: PortionCategoryGauge,
    pub portions_for_merge: PortionCategoryGauge,

    // Anchors
    pub portions_alone: PortionCategoryGauge,
    pub buckets_for_merge: AtomicI64,

    // Routing
    pub small_portions: PortionCategoryGauge,
    pub optimizers_active: AtomicI64,

    // Tasks
    pub tasks_final: AtomicU64,
    pub tasks_non_final: AtomicU64,
    pub tasks_skipped_busy: AtomicU64,
    /// Commit-time spread (ms) between youngest and oldest portion of the last task
    pub last_task_age_spread_ms: AtomicI64,
}

impl PlannerCounters {
    /// Creates a new counters instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bucket was created around `anchor`; it starts with nothing to merge.
    pub fn on_bucket_created<K>(&self, anchor: &PortionInfo<K>) {
        self.portions_alone.add_portion(anchor);
    }

    /// The bucket around `anchor` was destroyed.
    pub fn on_bucket_destroyed<K>(&self, anchor: &PortionInfo<K>, was_mergeable: bool) {
        if was_mergeable {
            self.portions_for_merge.remove_portion(anchor);
            self.buckets_for_merge.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.portions_alone.remove_portion(anchor);
        }
    }

    /// An anchored bucket gained its first mergeable portion.
    pub fn on_bucket_mergeable<K>(&self, anchor: &PortionInfo<K>) {
        self.portions_alone.remove_portion(anchor);
        self.buckets_for_merge.fetch_add(1, Ordering::Relaxed);
        self.portions_for_merge.add_portion(anchor);
    }

    /// An anchored bucket lost its last mergeable portion.
    pub fn on_bucket_alone<K>(&self, anchor: &PortionInfo<K>) {
        self.portions_for_merge.remove_portion(anchor);
        self.buckets_for_merge.fetch_sub(1, Ordering::Relaxed);
        self.portions_alone.add_portion(anchor);
    }

    pub fn on_optimizer_activated(&self) {
        self.optimizers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_optimizer_deactivated(&self) {
        self.optimizers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records a task handed out.
    pub fn record_task(&self, is_final: bool, age_spread_ms: i64) {
        if is_final {
            self.tasks_final.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_non_final.fetch_add(1, Ordering::Relaxed);
        }
        self.last_task_age_spread_ms
            .store(age_spread_ms, Ordering::Relaxed);
    }

    pub fn record_task_skipped_busy(&self) {
        self.tasks_skipped_busy.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current counters.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            actual_portions: self.actual_portions.snapshot(),
            future_portions: self.future_portions.snapshot(),
            portions_for_merge: self.portions_for_merge.snapshot(),
            portions_alone: self.portions_alone.snapshot(),
            small_portions: self.small_portions.snapshot(),
            buckets_for_merge: self.buckets_for_merge.load(Ordering::Relaxed),
            optimizers_active: self.optimizers_active.load(Ordering::Relaxed),
            tasks_final: self.tasks_final.load(Ordering::Relaxed),
            tasks_non_final: self.tasks_non_final.load(Ordering::Relaxed),
            tasks_skipped_busy: self.tasks_skipped_busy.load(Ordering::Relaxed),
            last_task_age_spread_ms: self.last_task_age_spread_ms.load(Ordering::Relaxed),
        }
    }

    /// Formats counters as Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        out.push_str("# HELP planner_portions Portions by planner category\n");
        out.push_str("# TYPE planner_portions gauge\n");
        for (category, gauge) in [
            ("actual", &snap.actual_portions),
            ("future", &snap.future_portions),
            ("for_merge", &snap.portions_for_merge),
            ("alone", &snap.portions_alone),
            ("small", &snap.small_portions),
        ] {
            out.push_str(&format!(
                "planner_portions{{category=\"{}\"}} {}\n",
                category, gauge.count
            ));
        }
        out.push('\n');

        out.push_str("# HELP planner_portion_bytes Portion bytes by planner category\n");
        out.push_str("# TYPE planner_portion_bytes gauge\n");
        for (category, gauge) in [
            ("actual", &snap.actual_portions),
            ("future", &snap.future_portions),
            ("for_merge", &snap.portions_for_merge),
            ("alone", &snap.portions_alone),
            ("small", &snap.small_portions),
        ] {
            out.push_str(&format!(
                "planner_portion_bytes{{category=\"{}\"}} {}\n",
                category, gauge.bytes
            ));
        }

        out.push_str(&format!(
            r#"
# HELP planner_buckets_for_merge Anchored buckets with mergeable portions
# TYPE planner_buckets_for_merge gauge
planner_buckets_for_merge {}

# HELP planner_optimizers_active Planners holding at least one portion
# TYPE planner_optimizers_active gauge
planner_optimizers_active {}

# HELP planner_tasks_total Compaction tasks by outcome
# TYPE planner_tasks_total counter
planner_tasks_total{{kind="final"}} {}
planner_tasks_total{{kind="non_final"}} {}
planner_tasks_total{{kind="skipped_busy"}} {}
"#,
            snap.buckets_for_merge,
            snap.optimizers_active,
            snap.tasks_final,
            snap.tasks_non_final,
            snap.tasks_skipped_busy,
        ));
        out
    }
}

/// A point-in-time snapshot of one gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategorySnapshot {
    pub count: i64,
    pub bytes: i64,
    pub rows: i64,
}

/// A point-in-time snapshot of counters.
#[derive(Debug, Clone, Default)]
pub struct CountersSnapshot {
    pub actual_portions: CategorySnapshot,
    pub future_portions: CategorySnapshot,
    pub portions_for_merge: CategorySnapshot,
    pub portions_alone: CategorySnapshot,
    pub small_portions: CategorySnapshot,
    pub buckets_for_merge: i64,
    pub optimizers_active: i64,
    pub tasks_final: u64,
    pub tasks_non_final: u64,
    pub tasks_skipped_busy: u64,
    pub last_task_age_spread_ms: i64,
}

impl CountersSnapshot {
    /// Total tasks handed out.
    pub fn tasks_total(&self) -> u64 {
        self.tasks_final + self.tasks_non_final
    }
}
