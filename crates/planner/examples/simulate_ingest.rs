/*
 * Ingest Simulation
 *
 * Drives one planner through a stream of small inserts and runs every task
 * it recommends through a fake executor that replaces the inputs with one
 * merged portion.
 *
 * Usage:
 *   RUST_LOG=compaction_planner=debug cargo run --example simulate_ingest -- \
 *     --rounds 50 \
 *     --inserts-per-round 8 \
 *     --tick-ms 30000
 */

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use compaction_common::{CompactionLimits, PlannerConfig, PortionInfo, ProducedKind};
use compaction_planner::{CompactionTask, OptimizerPlanner};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("compaction_planner=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let rounds: u64 = get_arg(&args, "--rounds").unwrap_or("50").parse()?;
    let inserts: u64 = get_arg(&args, "--inserts-per-round").unwrap_or("8").parse()?;
    let tick_ms: i64 = get_arg(&args, "--tick-ms").unwrap_or("30000").parse()?;

    let mut planner: OptimizerPlanner<i64> = OptimizerPlanner::new(1, PlannerConfig::default())?;
    let limits = CompactionLimits::default();
    let mut now = Utc::now();
    let mut next_id = 1u64;
    let mut merged = 0usize;

    for round in 0..rounds {
        let batch: Vec<_> = (0..inserts)
            .map(|i| {
                let start = ((round * inserts + i) * 37 % 10_000) as i64;
                let portion = PortionInfo::new(next_id + i, start, start + 50, 64 * 1024, 500, now)
                    .with_produced(ProducedKind::Inserted);
                Arc::new(portion)
            })
            .collect();
        next_id += inserts;
        planner.modify_portions_at(&batch, &[], now);

        now += Duration::milliseconds(tick_ms);
        planner.actualize(now);

        while let Some(task) = planner.get_optimization_task(&limits, &HashSet::new()) {
            let output = execute(&task, next_id, now);
            next_id += 1;
            merged += task.portion_count();
            let inputs: Vec<_> = task.portions.into_iter().map(Arc::new).collect();
            planner.modify_portions_at(&[output], &inputs, now);
        }
    }

    tracing::info!(
        merged,
        buckets = planner.bucket_positions().len(),
        priority = ?planner.get_useful_metric(),
        "Simulation finished"
    );
    println!("{}", planner.counters().to_prometheus());
    println!("{}", serde_json::to_string_pretty(&planner.serialize_to_json()?)?);

    let counters = planner.counters().clone();
    planner.release();
    tracing::info!(active = counters.snapshot().optimizers_active, "Counters after release");
    Ok(())
}

/// Merges a task's inputs into a single compacted portion.
fn execute(task: &CompactionTask<i64>, id: u64, now: DateTime<Utc>) -> Arc<PortionInfo<i64>> {
    let start = task.portions.iter().map(|p| p.key_start).min().unwrap_or_default();
    let end = task.portions.iter().map(|p| p.key_end).max().unwrap_or_default();
    let rows = task.portions.iter().map(|p| p.row_count).sum();
    Arc::new(PortionInfo::new(id, start, end, task.total_bytes, rows, now))
}

fn get_arg<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
