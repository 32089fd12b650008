/*
 * Portion pool: the non-anchor portions of one bucket.
 *
 * Portions are split into three disjoint categories:
 * - future:     still fresh, grouped by commit time
 * - pre-actual: settled, but ending at or after the future border
 * - actual:     settled and clear of the border, mergeable now
 *
 * The future border is the smallest key_start among future portions. A
 * settled portion reaching the border may still have to be merged together
 * with a future portion once that one settles, so it waits in pre-actual.
 */

use chrono::{DateTime, Utc};
use compaction_common::{PortionGroupStats, PortionId, PortionInfo, PrimaryKey, WeightPolicy};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::PlannerContext;

type PortionMap<K> = BTreeMap<PortionId, Arc<PortionInfo<K>>>;

/// Classification of a bucket's non-anchor portions.
#[derive(Debug)]
pub struct PortionsPool<K: PrimaryKey> {
    pre_actuals: PortionMap<K>,
    actuals: PortionMap<K>,
    futures: BTreeMap<DateTime<Utc>, PortionMap<K>>,
    /// Aggregates over `actuals`
    stats: PortionGroupStats,
    ctx: Arc<PlannerContext>,
}

/// Serializable view of a pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot<K> {
    pub actual: PortionGroupStats,
    pub pre_actual_count: usize,
    pub future_count: usize,
    pub future_border: Option<K>,
}

impl<K: PrimaryKey> PortionsPool<K> {
    pub fn new(ctx: Arc<PlannerContext>) -> Self {
        Self {
            pre_actuals: BTreeMap::new(),
            actuals: BTreeMap::new(),
            futures: BTreeMap::new(),
            stats: PortionGroupStats::default(),
            ctx,
        }
    }

    fn add_actual(&mut self, portion: Arc<PortionInfo<K>>) -> bool {
        if self.actuals.contains_key(&portion.id) {
            return false;
        }
        self.stats.add(&portion);
        self.ctx.counters.portions_for_merge.add_portion(&portion);
        self.ctx.counters.actual_portions.add_portion(&portion);
        self.actuals.insert(portion.id, portion);
        true
    }

    fn remove_actual(&mut self, id: PortionId) -> Option<Arc<PortionInfo<K>>> {
        let portion = self.actuals.remove(&id)?;
        self.stats.remove(&portion);
        self.ctx.counters.portions_for_merge.remove_portion(&portion);
        self.ctx.counters.actual_portions.remove_portion(&portion);
        Some(portion)
    }

    fn add_pre_actual(&mut self, portion: Arc<PortionInfo<K>>) -> bool {
        if self.pre_actuals.contains_key(&portion.id) {
            return false;
        }
        self.pre_actuals.insert(portion.id, portion);
        true
    }

    fn add_future(&mut self, portion: Arc<PortionInfo<K>>) -> bool {
        let bucket = self.futures.entry(portion.commit_time).or_default();
        if bucket.contains_key(&portion.id) {
            return false;
        }
        self.ctx.counters.future_portions.add_portion(&portion);
        bucket.insert(portion.id, portion);
        true
    }

    fn remove_future(&mut self, portion: &PortionInfo<K>) -> bool {
        let Some(bucket) = self.futures.get_mut(&portion.commit_time) else {
            return false;
        };
        let Some(removed) = bucket.remove(&portion.id) else {
            return false;
        };
        if bucket.is_empty() {
            self.futures.remove(&portion.commit_time);
        }
        self.ctx.counters.future_portions.remove_portion(&removed);
        true
    }

    fn contains(&self, portion: &PortionInfo<K>) -> bool {
        self.actuals.contains_key(&portion.id)
            || self.pre_actuals.contains_key(&portion.id)
            || self
                .futures
                .get(&portion.commit_time)
                .is_some_and(|bucket| bucket.contains_key(&portion.id))
    }

    fn is_blocked(portion: &PortionInfo<K>, border: Option<&K>) -> bool {
        border.is_some_and(|b| *b <= portion.key_end)
    }

    /// Checks category disjointness, and that `portion` (the bucket's anchor)
    /// is not also held by the pool. Panics on violation.
    pub fn validate(&self, portion: Option<&PortionInfo<K>>) -> bool {
        if let Some(portion) = portion {
            assert!(!self.pre_actuals.contains_key(&portion.id), "anchor {} is pre-actual", portion.id);
            assert!(!self.actuals.contains_key(&portion.id), "anchor {} is actual", portion.id);
            for bucket in self.futures.values() {
                assert!(!bucket.contains_key(&portion.id), "anchor {} is future", portion.id);
            }
        }
        for bucket in self.futures.values() {
            for id in bucket.keys() {
                assert!(!self.actuals.contains_key(id), "future portion {} is actual", id);
                assert!(!self.pre_actuals.contains_key(id), "future portion {} is pre-actual", id);
            }
        }
        for id in self.pre_actuals.keys() {
            assert!(!self.actuals.contains_key(id), "pre-actual portion {} is actual", id);
        }
        let future_ids: usize = self.futures.values().map(|b| b.len()).sum();
        let distinct: std::collections::BTreeSet<_> =
            self.futures.values().flat_map(|b| b.keys()).collect();
        assert_eq!(future_ids, distinct.len(), "portion present in two future buckets");
        assert_eq!(self.stats.count as usize, self.actuals.len(), "actual stats drifted");
        true
    }

    pub fn is_empty(&self) -> bool {
        self.actuals.is_empty() && self.futures.is_empty() && self.pre_actuals.is_empty()
    }

    pub fn actuals_empty(&self) -> bool {
        self.actuals.is_empty()
    }

    pub fn stats(&self) -> &PortionGroupStats {
        &self.stats
    }

    pub fn pre_actual_count(&self) -> usize {
        self.pre_actuals.len()
    }

    pub fn future_count(&self) -> usize {
        self.futures.values().map(|b| b.len()).sum()
    }

    pub fn is_actual(&self, id: PortionId) -> bool {
        self.actuals.contains_key(&id)
    }

    pub fn is_pre_actual(&self, id: PortionId) -> bool {
        self.pre_actuals.contains_key(&id)
    }

    pub fn is_future(&self, id: PortionId) -> bool {
        self.futures.values().any(|b| b.contains_key(&id))
    }

    /// Ids of every portion held, in any category.
    pub fn portion_ids(&self) -> Vec<PortionId> {
        self.actuals
            .keys()
            .chain(self.pre_actuals.keys())
            .chain(self.futures.values().flat_map(|b| b.keys()))
            .copied()
            .collect()
    }

    fn settled_and_maybe_future(&self, with_futures: bool) -> impl Iterator<Item = &Arc<PortionInfo<K>>> {
        let futures = self
            .futures
            .values()
            .flat_map(|b| b.values())
            .filter(move |_| with_futures);
        self.actuals
            .values()
            .chain(self.pre_actuals.values())
            .chain(futures)
    }

    /// Every portion held, in any category.
    pub(crate) fn portions(&self) -> impl Iterator<Item = &Arc<PortionInfo<K>>> {
        self.settled_and_maybe_future(true)
    }

    pub fn oldest_portion(&self, with_futures: bool) -> Option<&Arc<PortionInfo<K>>> {
        self.settled_and_maybe_future(with_futures)
            .min_by_key(|p| p.commit_time)
    }

    pub fn youngest_portion(&self, with_futures: bool) -> Option<&Arc<PortionInfo<K>>> {
        self.settled_and_maybe_future(with_futures)
            .max_by_key(|p| p.commit_time)
    }

    /// Commit time of the oldest future group.
    pub fn future_start_instant(&self) -> Option<DateTime<Utc>> {
        self.futures.keys().next().copied()
    }

    pub fn future_border(&self) -> Option<&K> {
        self.futures
            .values()
            .flat_map(|b| b.values())
            .map(|p| &p.key_start)
            .min()
    }

    pub fn actuals_vec(&self, with_pre_actual: bool) -> Vec<Arc<PortionInfo<K>>> {
        let mut result: Vec<_> = self.actuals.values().cloned().collect();
        if with_pre_actual {
            result.extend(self.pre_actuals.values().cloned());
        }
        result
    }

    pub fn add(&mut self, portion: Arc<PortionInfo<K>>, now: DateTime<Utc>) {
        assert!(
            !self.contains(&portion),
            "portion {} is already in the pool",
            portion.id
        );
        if self.ctx.freshness.is_fresh(now, portion.commit_time) {
            self.add_future(portion);
        } else if Self::is_blocked(&portion, self.future_border()) {
            self.add_pre_actual(portion);
        } else {
            self.add_actual(portion);
        }
    }

    pub fn remove(&mut self, portion: &PortionInfo<K>) {
        if self.pre_actuals.remove(&portion.id).is_some() {
            return;
        }
        if self.remove_actual(portion.id).is_some() {
            return;
        }
        assert!(
            self.remove_future(portion),
            "portion {} is not in the pool",
            portion.id
        );
    }

    /// Promotes settled futures, then reconciles actual / pre-actual against
    /// the new border in both directions.
    pub fn actualize(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.futures.first_entry() {
            if self.ctx.freshness.is_fresh(now, *entry.key()) {
                break;
            }
            let settled = entry.remove();
            for portion in settled.into_values() {
                self.ctx.counters.future_portions.remove_portion(&portion);
                let id = portion.id;
                assert!(self.add_pre_actual(portion), "settled portion {} already pre-actual", id);
            }
        }

        let border = self.future_border().cloned();

        let unblocked: Vec<PortionId> = self
            .pre_actuals
            .values()
            .filter(|p| !Self::is_blocked(p, border.as_ref()))
            .map(|p| p.id)
            .collect();
        for id in unblocked {
            if let Some(portion) = self.pre_actuals.remove(&id) {
                assert!(self.add_actual(portion), "unblocked portion {} already actual", id);
            }
        }

        let blocked: Vec<PortionId> = self
            .actuals
            .values()
            .filter(|p| Self::is_blocked(p, border.as_ref()))
            .map(|p| p.id)
            .collect();
        for id in blocked {
            if let Some(portion) = self.remove_actual(id) {
                assert!(self.add_pre_actual(portion), "blocked portion {} already pre-actual", id);
            }
        }
    }

    /// Takes the counters' view of this pool's contents back out.
    ///
    /// Called whenever a pool is dissolved, before its portions are handed
    /// elsewhere.
    pub fn release(&self) {
        for portion in self.actuals.values() {
            self.ctx.counters.portions_for_merge.remove_portion(portion);
            self.ctx.counters.actual_portions.remove_portion(portion);
        }
        for portion in self.futures.values().flat_map(|b| b.values()) {
            self.ctx.counters.future_portions.remove_portion(portion);
        }
    }

    /// Absorbs the pool of a destroyed neighbour.
    ///
    /// Portions shared by both pools keep a single category here; pre-actual
    /// wins over actual.
    pub fn merge_from(&mut self, source: PortionsPool<K>) {
        source.release();
        let PortionsPool {
            pre_actuals,
            actuals,
            futures,
            ..
        } = source;

        for (id, portion) in actuals {
            if !self.pre_actuals.contains_key(&id) {
                self.add_actual(portion);
            }
        }
        for (id, portion) in pre_actuals {
            self.add_pre_actual(portion);
            self.remove_actual(id);
        }
        for portion in futures.into_values().flat_map(|b| b.into_values()) {
            self.add_future(portion);
        }
    }

    /// Copies every portion reaching `split_key` into `dest` (same
    /// category) and drops from `self` those starting at or after it.
    pub fn split_to(&mut self, dest: &mut PortionsPool<K>, split_key: &K) {
        let reaching = |p: &&Arc<PortionInfo<K>>| *split_key <= p.key_end;
        let leaves = |p: &Arc<PortionInfo<K>>| *split_key <= p.key_start;

        let futures: Vec<_> = self
            .futures
            .values()
            .flat_map(|b| b.values())
            .filter(reaching)
            .cloned()
            .collect();
        for portion in futures {
            if leaves(&portion) {
                assert!(self.remove_future(&portion), "future portion {} vanished", portion.id);
            }
            let id = portion.id;
            assert!(dest.add_future(portion), "future portion {} already in split target", id);
        }

        let pre_actuals: Vec<_> = self.pre_actuals.values().filter(reaching).cloned().collect();
        for portion in pre_actuals {
            if leaves(&portion) {
                self.pre_actuals.remove(&portion.id);
            }
            let id = portion.id;
            assert!(dest.add_pre_actual(portion), "pre-actual portion {} already in split target", id);
        }

        let actuals: Vec<_> = self.actuals.values().filter(reaching).cloned().collect();
        for portion in actuals {
            if leaves(&portion) {
                self.remove_actual(portion.id);
            }
            let id = portion.id;
            assert!(dest.add_actual(portion), "actual portion {} already in split target", id);
        }
    }

    /// Compaction priority of this pool.
    ///
    /// Count dominates (via `weight_count_factor`), fewer bytes break ties.
    /// Non-final buckets keep receiving data, so they are boosted. Goes
    /// negative once bytes outgrow `weight_count_factor * count`.
    pub fn weight(&self, main_portion: Option<&PortionInfo<K>>, is_final: bool) -> i64 {
        let config = &self.ctx.config;
        let mut count = self.stats.count;
        let mut bytes = self.stats.bytes;
        let mut records = self.stats.records;
        if let Some(main) = main_portion.filter(|_| !is_final) {
            count += 1;
            bytes += main.byte_size;
            records += main.row_count;
        }

        let worth = match config.weight_policy {
            WeightPolicy::DisableCompact => return 0,
            WeightPolicy::ForceCompact => count > 1,
            WeightPolicy::Normal => {
                count > 1
                    && (bytes > config.size_threshold_bytes
                        || !is_final
                        || count > config.count_threshold
                        || records > config.records_threshold)
            }
        };
        if !worth {
            return 0;
        }

        let multiplier = if is_final { 1 } else { config.non_final_multiplier };
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        config
            .weight_count_factor
            .saturating_mul(count)
            .saturating_sub(bytes)
            .saturating_mul(multiplier)
    }

    pub fn snapshot(&self) -> PoolSnapshot<K> {
        PoolSnapshot {
            actual: self.stats,
            pre_actual_count: self.pre_actuals.len(),
            future_count: self.future_count(),
            future_border: self.future_border().cloned(),
        }
    }

    pub fn debug_string(&self, verbose: bool) -> String {
        if !verbose {
            return self.stats.debug_string();
        }
        match (self.oldest_portion(true), self.youngest_portion(true)) {
            (Some(oldest), Some(youngest)) => format!(
                "{{oldest={};youngest={};}}",
                oldest.debug_string(),
                youngest.debug_string()
            ),
            _ => "{}".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compaction_common::{PlannerConfig, PlannerConfigBuilder, PlannerCounters};
    use std::time::Duration;

    const F_MS: i64 = 300_000;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn ctx_with(config: PlannerConfig) -> Arc<PlannerContext> {
        PlannerContext::new(config, Arc::new(PlannerCounters::new())).unwrap()
    }

    fn pool() -> PortionsPool<i64> {
        PortionsPool::new(ctx_with(PlannerConfig::default()))
    }

    fn portion(id: u64, start: i64, end: i64, commit_ms: i64) -> Arc<PortionInfo<i64>> {
        Arc::new(PortionInfo::new(id, start, end, 1000, 100, at(commit_ms)))
    }

    const NOW: i64 = 10_000_000;
    const STALE: i64 = NOW - 2 * F_MS;

    #[test]
    fn test_add_classifies_by_freshness_and_border() {
        let mut pool = pool();
        pool.add(portion(1, 50, 60, NOW - 1000), at(NOW));
        assert!(pool.is_future(PortionId(1)));
        assert_eq!(pool.future_border(), Some(&50));

        // Ends before the border
        pool.add(portion(2, 0, 49, STALE), at(NOW));
        assert!(pool.is_actual(PortionId(2)));

        // Reaches the border
        pool.add(portion(3, 40, 50, STALE), at(NOW));
        assert!(pool.is_pre_actual(PortionId(3)));

        assert_eq!(pool.stats().count, 1);
        assert!(pool.validate(None));
    }

    #[test]
    #[should_panic(expected = "already in the pool")]
    fn test_duplicate_add_panics() {
        let mut pool = pool();
        pool.add(portion(1, 0, 10, STALE), at(NOW));
        pool.add(portion(1, 0, 10, STALE), at(NOW));
    }

    #[test]
    #[should_panic(expected = "not in the pool")]
    fn test_unknown_remove_panics() {
        let mut pool = pool();
        pool.remove(&portion(9, 0, 10, STALE));
    }

    #[test]
    fn test_remove_from_each_category() {
        let mut pool = pool();
        let future = portion(1, 50, 60, NOW);
        let actual = portion(2, 0, 10, STALE);
        let pre_actual = portion(3, 0, 70, STALE);
        pool.add(future.clone(), at(NOW));
        pool.add(actual.clone(), at(NOW));
        pool.add(pre_actual.clone(), at(NOW));

        pool.remove(&pre_actual);
        pool.remove(&actual);
        pool.remove(&future);
        assert!(pool.is_empty());
        assert_eq!(pool.stats().count, 0);
    }

    #[test]
    fn test_actualize_promotes_and_unblocks() {
        let mut pool = pool();
        pool.add(portion(1, 50, 60, NOW), at(NOW));
        pool.add(portion(2, 40, 55, STALE), at(NOW));
        assert!(pool.is_pre_actual(PortionId(2)));

        // Still fresh: nothing moves
        pool.actualize(at(NOW + F_MS - 1));
        assert!(pool.is_future(PortionId(1)));
        assert!(pool.is_pre_actual(PortionId(2)));

        pool.actualize(at(NOW + F_MS));
        assert!(pool.is_actual(PortionId(1)));
        assert!(pool.is_actual(PortionId(2)));
        assert_eq!(pool.future_border(), None);
        assert_eq!(pool.stats().count, 2);
    }

    #[test]
    fn test_actualize_demotes_when_border_appears() {
        let mut pool = pool();
        pool.add(portion(1, 0, 30, STALE), at(NOW));
        assert!(pool.is_actual(PortionId(1)));

        pool.add(portion(2, 20, 40, NOW), at(NOW));
        // Add does not reclassify existing portions
        assert!(pool.is_actual(PortionId(1)));

        pool.actualize(at(NOW));
        assert!(pool.is_pre_actual(PortionId(1)));
        assert!(pool.actuals_empty());
    }

    #[test]
    fn test_actualize_is_idempotent() {
        let mut pool = pool();
        pool.add(portion(1, 50, 60, NOW), at(NOW));
        pool.add(portion(2, 10, 20, NOW - F_MS / 2), at(NOW));
        pool.add(portion(3, 0, 55, STALE), at(NOW));
        pool.add(portion(4, 0, 5, STALE), at(NOW));

        let later = at(NOW + F_MS / 2 + 1);
        pool.actualize(later);
        let first = (pool.snapshot().actual, pool.pre_actual_count(), pool.future_count());
        pool.actualize(later);
        let second = (pool.snapshot().actual, pool.pre_actual_count(), pool.future_count());
        assert_eq!(first, second);
        assert!(pool.validate(None));
    }

    #[test]
    fn test_split_to_moves_and_shares() {
        let ctx = ctx_with(PlannerConfig::default());
        let mut left = PortionsPool::new(ctx.clone());
        let mut right = PortionsPool::new(ctx);

        left.add(portion(1, 0, 10, STALE), at(NOW)); // stays
        left.add(portion(2, 90, 110, STALE), at(NOW)); // straddles
        left.add(portion(3, 120, 130, STALE), at(NOW)); // moves
        left.add(portion(4, 150, 160, NOW), at(NOW)); // future, moves

        left.split_to(&mut right, &100);

        assert_eq!(left.portion_ids(), vec![PortionId(1), PortionId(2)]);
        let mut right_ids = right.portion_ids();
        right_ids.sort();
        assert_eq!(right_ids, vec![PortionId(2), PortionId(3), PortionId(4)]);
        assert!(right.is_future(PortionId(4)));
        assert!(left.validate(None));
        assert!(right.validate(None));
    }

    #[test]
    fn test_merge_from_prefers_pre_actual() {
        let ctx = ctx_with(PlannerConfig::default());
        let mut left = PortionsPool::new(ctx.clone());
        let mut right = PortionsPool::new(ctx);

        // Same portion, actual on the left, pre-actual on the right
        let shared = portion(1, 90, 110, STALE);
        left.add(shared.clone(), at(NOW));
        right.add(portion(2, 100, 105, NOW), at(NOW));
        right.add(shared, at(NOW));
        assert!(left.is_actual(PortionId(1)));
        assert!(right.is_pre_actual(PortionId(1)));

        right.add(portion(3, 0, 5, STALE), at(NOW));
        left.merge_from(right);

        assert!(left.is_pre_actual(PortionId(1)));
        assert!(left.is_future(PortionId(2)));
        assert!(left.is_actual(PortionId(3)));
        assert_eq!(left.stats().count, 1);
        assert!(left.validate(None));
    }

    #[test]
    fn test_weight_final_thresholds() {
        let mut pool = pool();
        pool.add(portion(1, 0, 10, STALE), at(NOW));
        pool.add(portion(2, 20, 30, STALE), at(NOW));
        // Two tiny portions in a final bucket are not worth it
        assert_eq!(pool.weight(None, true), 0);

        let mut pool = PortionsPool::new(ctx_with(PlannerConfig::default()));
        for id in 0..101 {
            pool.add(portion(id, id as i64, id as i64, STALE), at(NOW));
        }
        assert_eq!(pool.weight(None, true), 10_000_000_000 * 101 - 101_000);
    }

    #[test]
    fn test_weight_counts_anchor_when_not_final() {
        let mut pool = pool();
        let anchor = PortionInfo::new(100, 0, 5, 5000, 10, at(STALE));
        pool.add(portion(1, 6, 10, STALE), at(NOW));

        assert_eq!(pool.weight(Some(&anchor), true), 0);
        assert_eq!(pool.weight(Some(&anchor), false), (10_000_000_000 * 2 - 6000) * 10);
        // Without an anchor one portion is nothing to merge
        assert_eq!(pool.weight(None, false), 0);
    }

    #[test]
    fn test_weight_goes_negative_when_bytes_dominate() {
        let mut pool = pool();
        let anchor = PortionInfo::new(100, 0, 5, 30_000_000_000, 10, at(STALE));
        pool.add(portion(1, 6, 10, STALE), at(NOW));

        let weight = pool.weight(Some(&anchor), false);
        assert_eq!(weight, (10_000_000_000 * 2 - 30_000_001_000) * 10);
        assert!(weight < 0);
    }

    #[test]
    fn test_weight_policies() {
        let force = ctx_with(
            PlannerConfigBuilder::default()
                .weight_policy(WeightPolicy::ForceCompact)
                .build()
                .unwrap(),
        );
        let mut pool = PortionsPool::new(force);
        pool.add(portion(1, 0, 10, STALE), at(NOW));
        assert_eq!(pool.weight(None, true), 0);
        pool.add(portion(2, 20, 30, STALE), at(NOW));
        assert_eq!(pool.weight(None, true), 10_000_000_000 * 2 - 2000);

        let disable = ctx_with(
            PlannerConfigBuilder::default()
                .weight_policy(WeightPolicy::DisableCompact)
                .build()
                .unwrap(),
        );
        let mut pool = PortionsPool::new(disable);
        pool.add(portion(1, 0, 10, STALE), at(NOW));
        pool.add(portion(2, 20, 30, STALE), at(NOW));
        assert_eq!(pool.weight(None, false), 0);
    }

    #[test]
    fn test_weight_records_threshold() {
        let ctx = ctx_with(
            PlannerConfigBuilder::default()
                .records_threshold(150u64)
                .freshness_window(Duration::from_millis(F_MS as u64))
                .build()
                .unwrap(),
        );
        let mut pool = PortionsPool::new(ctx);
        pool.add(portion(1, 0, 10, STALE), at(NOW));
        pool.add(portion(2, 20, 30, STALE), at(NOW));
        assert!(pool.weight(None, true) > 0);
    }

    #[test]
    fn test_oldest_and_youngest() {
        let mut pool = pool();
        pool.add(portion(1, 0, 10, STALE), at(NOW));
        pool.add(portion(2, 20, 30, STALE + 5), at(NOW));
        pool.add(portion(3, 40, 50, NOW), at(NOW));

        assert_eq!(pool.oldest_portion(true).unwrap().id, PortionId(1));
        assert_eq!(pool.youngest_portion(true).unwrap().id, PortionId(3));
        assert_eq!(pool.youngest_portion(false).unwrap().id, PortionId(2));
        assert_eq!(pool.future_start_instant(), Some(at(NOW)));
    }

    #[test]
    fn test_release_clears_counters() {
        let counters = Arc::new(PlannerCounters::new());
        let ctx = PlannerContext::new(PlannerConfig::default(), counters.clone()).unwrap();
        let mut pool = PortionsPool::new(ctx);
        pool.add(portion(1, 0, 10, STALE), at(NOW));
        pool.add(portion(2, 20, 30, NOW), at(NOW));
        assert_eq!(counters.snapshot().actual_portions.count, 1);
        assert_eq!(counters.snapshot().future_portions.count, 1);

        pool.release();
        assert_eq!(counters.snapshot().actual_portions.count, 0);
        assert_eq!(counters.snapshot().future_portions.count, 0);
    }
}
