/*
 * Bucket: one key-range segment of the partition.
 *
 * A bucket is anchored by one large portion (the sentinel bucket left of the
 * first anchor has none) and owns a pool of the smaller or overlapping
 * portions falling into [anchor.key_start, next_border]. A bucket without a
 * next border is the last, open-ended segment and is called final.
 */

use chrono::{DateTime, Utc};
use compaction_common::{PortionId, PortionInfo, PrimaryKey};
use compaction_proto::Checkpoint;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::context::PlannerContext;
use crate::pool::PortionsPool;

/// Portions and split points selected from one bucket.
#[derive(Debug, Clone)]
pub struct TaskDraft<K> {
    pub portions: Vec<Arc<PortionInfo<K>>>,
    pub checkpoints: Vec<Checkpoint<K>>,
    pub total_bytes: u64,
    pub is_final: bool,
    pub stop_instant: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct PortionsBucket<K: PrimaryKey> {
    anchor: Option<Arc<PortionInfo<K>>>,
    others: PortionsPool<K>,
    next_border: Option<K>,
    ctx: Arc<PlannerContext>,
}

impl<K: PrimaryKey> PortionsBucket<K> {
    pub fn new(anchor: Option<Arc<PortionInfo<K>>>, ctx: Arc<PlannerContext>) -> Self {
        if let Some(anchor) = &anchor {
            ctx.counters.on_bucket_created(anchor);
        }
        Self {
            anchor,
            others: PortionsPool::new(ctx.clone()),
            next_border: None,
            ctx,
        }
    }

    /// The anchor-less bucket left of every anchor.
    pub fn sentinel(ctx: Arc<PlannerContext>) -> Self {
        Self::new(None, ctx)
    }

    pub fn anchor(&self) -> Option<&Arc<PortionInfo<K>>> {
        self.anchor.as_ref()
    }

    pub fn anchor_id(&self) -> Option<PortionId> {
        self.anchor.as_ref().map(|a| a.id)
    }

    pub fn next_border(&self) -> Option<&K> {
        self.next_border.as_ref()
    }

    pub fn others(&self) -> &PortionsPool<K> {
        &self.others
    }

    pub fn is_final(&self) -> bool {
        self.next_border.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.anchor.is_none() && self.others.is_empty()
    }

    fn validate(&self) -> bool {
        self.others.validate(self.anchor.as_deref())
    }

    /// Runs a mutation and reports the bucket's move between the "alone"
    /// and "for merge" states to the counters.
    fn modify<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        debug_assert!(self.validate());
        let was_alone = self.others.actuals_empty();
        let result = f(self);
        debug_assert!(self.validate());

        if let Some(anchor) = &self.anchor {
            match (was_alone, self.others.actuals_empty()) {
                (true, false) => self.ctx.counters.on_bucket_mergeable(anchor),
                (false, true) => self.ctx.counters.on_bucket_alone(anchor),
                _ => {}
            }
        }
        result
    }

    /// Drops the anchor from the counters and hands out what the bucket held.
    fn dissolve(self) -> (PortionsPool<K>, Option<K>) {
        if let Some(anchor) = &self.anchor {
            self.ctx
                .counters
                .on_bucket_destroyed(anchor, !self.others.actuals_empty());
        }
        (self.others, self.next_border)
    }

    /// Takes the anchor and the pool back out of the counters.
    pub(crate) fn release(self) {
        let (others, _) = self.dissolve();
        others.release();
    }

    pub(crate) fn portions(&self) -> impl Iterator<Item = &Arc<PortionInfo<K>>> {
        self.anchor.iter().chain(self.others.portions())
    }

    pub fn oldest_portion(&self, with_futures: bool) -> Option<&Arc<PortionInfo<K>>> {
        let other = self.others.oldest_portion(with_futures);
        match (self.anchor.as_ref(), other) {
            (Some(anchor), Some(other)) if anchor.commit_time < other.commit_time => Some(anchor),
            (_, Some(other)) => Some(other),
            (anchor, None) => anchor,
        }
    }

    pub fn youngest_portion(&self, with_futures: bool) -> Option<&Arc<PortionInfo<K>>> {
        let other = self.others.youngest_portion(with_futures);
        match (self.anchor.as_ref(), other) {
            (Some(anchor), Some(other)) if anchor.commit_time > other.commit_time => Some(anchor),
            (_, Some(other)) => Some(other),
            (anchor, None) => anchor,
        }
    }

    pub fn weight(&self) -> i64 {
        self.others.weight(self.anchor.as_deref(), self.is_final())
    }

    pub fn add_other(&mut self, portion: Arc<PortionInfo<K>>, now: DateTime<Utc>) {
        if let (Some(anchor), Some(border)) = (&self.anchor, &self.next_border) {
            debug_assert!(
                portion.crosses_range(&anchor.key_start, border),
                "portion {} is outside bucket [{:?}, {:?}]",
                portion.id,
                anchor.key_start,
                border
            );
            if tracing::enabled!(tracing::Level::DEBUG) {
                let oldest = self.oldest_portion(true).map(|p| p.commit_time);
                let youngest = self.youngest_portion(true).map(|p| p.commit_time);
                let delta_ms = oldest
                    .zip(youngest)
                    .map(|(o, y)| (y - o).num_milliseconds())
                    .unwrap_or_default();
                debug!(
                    event = "other_not_final",
                    portion = %portion.id,
                    anchor = %anchor.id,
                    delta_ms,
                    bucket_from = ?anchor.key_start,
                    bucket_to = ?border
                );
            }
        }
        self.modify(|bucket| bucket.others.add(portion, now));
    }

    pub fn remove_other(&mut self, portion: &PortionInfo<K>) {
        self.modify(|bucket| bucket.others.remove(portion));
    }

    pub fn actualize(&mut self, now: DateTime<Utc>) {
        self.modify(|bucket| bucket.others.actualize(now));
    }

    /// Folds a destroyed right neighbour into this bucket, inheriting its
    /// next border.
    pub fn merge_others_from(&mut self, source: PortionsBucket<K>) {
        self.modify(|bucket| {
            let (pool, next_border) = source.dissolve();
            bucket.others.merge_from(pool);
            bucket.next_border = next_border;
        });
    }

    /// Hands the part of this bucket right of `dest`'s anchor over to `dest`,
    /// which becomes the new right neighbour.
    pub fn split_others_with(&mut self, dest: &mut PortionsBucket<K>) {
        let split_key = match &dest.anchor {
            Some(anchor) => anchor.key_start.clone(),
            None => panic!("split target must have an anchor"),
        };
        if let Some(anchor) = &self.anchor {
            assert!(
                anchor.key_end < split_key,
                "anchor {} overlaps the new anchor at {:?}",
                anchor.id,
                split_key
            );
        }
        dest.modify(|dest| {
            self.modify(|bucket| {
                dest.next_border = bucket.next_border.take();
                bucket.next_border = Some(split_key.clone());
                bucket.others.split_to(&mut dest.others, &split_key);
            })
        });
    }

    /// Selects the portions to merge in this bucket.
    ///
    /// `next_border` must be the bucket's own next border, looked up by the
    /// index. Returns None if any selected portion is busy.
    pub fn build_optimization_task(
        &self,
        busy_portions: &HashSet<PortionId>,
        next_border: Option<&K>,
    ) -> Option<TaskDraft<K>> {
        assert_eq!(
            next_border,
            self.next_border.as_ref(),
            "next border passed by the index disagrees with the bucket"
        );

        let mut portions = self.others.actuals_vec(true);
        let stop_point;
        let mut stop_instant = None;
        if let Some(border) = next_border {
            if let Some(anchor) = &self.anchor {
                portions.push(anchor.clone());
            }
            stop_point = Some(border.clone());
        } else {
            stop_point = self.others.future_border().cloned();
            if let Some(anchor) = &self.anchor {
                if portions.iter().any(|p| anchor.crosses(p)) {
                    portions.push(anchor.clone());
                }
            }
            stop_instant = self.others.future_start_instant();
        }
        assert!(
            portions.len() > 1,
            "bucket rated for merge selected {} portions",
            portions.len()
        );

        if let Some(busy) = portions.iter().find(|p| busy_portions.contains(&p.id)) {
            debug!(
                event = "skip_optimization",
                reason = "busy",
                portion = %busy.id,
                info = %self.others.debug_string(false)
            );
            self.ctx.counters.record_task_skipped_busy();
            return None;
        }

        let total_bytes = portions.iter().map(|p| p.byte_size).sum();
        let is_final = next_border.is_none();

        let mut checkpoints = Vec::with_capacity(3);
        if let Some(anchor) = &self.anchor {
            checkpoints.push(Checkpoint::anchor_bound(anchor.key_start.clone()));
            if is_final {
                checkpoints.push(Checkpoint::anchor_bound(anchor.key_end.clone()));
            }
        }
        if let Some(stop) = &stop_point {
            checkpoints.push(Checkpoint::stop_point(stop.clone()));
        }

        let spread_ms = self
            .oldest_portion(!is_final)
            .zip(self.youngest_portion(!is_final))
            .map(|(o, y)| (y.commit_time - o.commit_time).num_milliseconds())
            .unwrap_or_default();
        self.ctx.counters.record_task(is_final, spread_ms);

        debug!(
            event = "start_optimization",
            count = portions.len(),
            size = total_bytes,
            is_final,
            stop_point = ?stop_point,
            stop_instant = ?stop_instant,
            info = %self.others.debug_string(false)
        );

        Some(TaskDraft {
            portions,
            checkpoints,
            total_bytes,
            is_final,
            stop_instant,
        })
    }
}
