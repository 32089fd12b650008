/*
 * Bucket index: the ordered partition of one path's key space.
 *
 * Buckets are keyed by their anchor's key_start. The sentinel bucket covers
 * everything left of the first anchor. Every bucket is also rated in a
 * weight index so the heaviest one can be found without a scan.
 */

use chrono::{DateTime, Utc};
use compaction_common::{PortionId, PortionInfo, PrimaryKey, ProducedKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

use crate::bucket::{PortionsBucket, TaskDraft};
use crate::context::PlannerContext;
use crate::pool::PoolSnapshot;

/// Position of a bucket in the index.
///
/// The sentinel orders before every anchored bucket, so on equal weight the
/// lowest key segment wins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum BucketSlot<K> {
    Sentinel,
    Anchor(K),
}

/// Buckets grouped by their current weight.
#[derive(Debug)]
struct WeightIndex<K> {
    by_weight: BTreeMap<i64, BTreeSet<BucketSlot<K>>>,
}

impl<K: PrimaryKey> WeightIndex<K> {
    fn new() -> Self {
        Self {
            by_weight: BTreeMap::new(),
        }
    }

    fn insert(&mut self, weight: i64, slot: BucketSlot<K>) {
        let rated = self.by_weight.entry(weight).or_default();
        assert!(rated.insert(slot.clone()), "bucket {:?} is already rated", slot);
    }

    fn remove(&mut self, weight: i64, slot: &BucketSlot<K>) {
        let Some(rated) = self.by_weight.get_mut(&weight) else {
            panic!("no bucket is rated at weight {} (looking for {:?})", weight, slot);
        };
        assert!(rated.remove(slot), "bucket {:?} is not rated at weight {}", slot, weight);
        if rated.is_empty() {
            self.by_weight.remove(&weight);
        }
    }

    fn contains(&self, weight: i64, slot: &BucketSlot<K>) -> bool {
        self.by_weight
            .get(&weight)
            .is_some_and(|rated| rated.contains(slot))
    }

    fn len(&self) -> usize {
        self.by_weight.values().map(|rated| rated.len()).sum()
    }

    /// Heaviest weight and the lowest slot carrying it.
    fn top(&self) -> Option<(i64, &BucketSlot<K>)> {
        let (weight, rated) = self.by_weight.last_key_value()?;
        rated.first().map(|slot| (*weight, slot))
    }
}

fn slot_mut<'a, K: PrimaryKey>(
    left: &'a mut PortionsBucket<K>,
    buckets: &'a mut BTreeMap<K, PortionsBucket<K>>,
    slot: &BucketSlot<K>,
) -> &'a mut PortionsBucket<K> {
    match slot {
        BucketSlot::Sentinel => left,
        BucketSlot::Anchor(key) => match buckets.get_mut(key) {
            Some(bucket) => bucket,
            None => panic!("no bucket starts at {:?}", key),
        },
    }
}

/// Serializable view of one bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot<K> {
    pub slot: BucketSlot<K>,
    pub anchor: Option<PortionId>,
    pub next_border: Option<K>,
    pub weight: i64,
    pub pool: PoolSnapshot<K>,
}

/// Serializable view of the whole index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSnapshot<K> {
    pub weight: i64,
    pub buckets: Vec<BucketSnapshot<K>>,
}

#[derive(Debug)]
pub struct PortionBuckets<K: PrimaryKey> {
    left: PortionsBucket<K>,
    buckets: BTreeMap<K, PortionsBucket<K>>,
    rating: WeightIndex<K>,
    ctx: Arc<PlannerContext>,
}

impl<K: PrimaryKey> PortionBuckets<K> {
    pub fn new(ctx: Arc<PlannerContext>) -> Self {
        let left = PortionsBucket::sentinel(ctx.clone());
        let mut rating = WeightIndex::new();
        rating.insert(left.weight(), BucketSlot::Sentinel);
        Self {
            left,
            buckets: BTreeMap::new(),
            rating,
            ctx,
        }
    }

    /// Takes `slot` out of the weight index, mutates it and rates it again.
    fn with_rating<R>(
        &mut self,
        slot: &BucketSlot<K>,
        f: impl FnOnce(&mut PortionsBucket<K>) -> R,
    ) -> R {
        let bucket = slot_mut(&mut self.left, &mut self.buckets, slot);
        self.rating.remove(bucket.weight(), slot);
        let result = f(&mut *bucket);
        self.rating.insert(bucket.weight(), slot.clone());
        result
    }

    /// Slot of the bucket owning `key`: the last one starting at or before
    /// it, or the sentinel.
    fn owner_slot(&self, key: &K) -> BucketSlot<K> {
        match self.buckets.range::<K, _>(..=key).next_back() {
            Some((start, _)) => BucketSlot::Anchor(start.clone()),
            None => BucketSlot::Sentinel,
        }
    }

    fn predecessor_slot(&self, key: &K) -> BucketSlot<K> {
        match self.buckets.range::<K, _>(..key).next_back() {
            Some((start, _)) => BucketSlot::Anchor(start.clone()),
            None => BucketSlot::Sentinel,
        }
    }

    /// Anchor starts in `(from, to]`.
    fn starts_within(&self, from: &K, to: &K) -> Vec<&K> {
        if from >= to {
            return Vec::new();
        }
        self.buckets
            .range::<K, _>((Bound::Excluded(from), Bound::Included(to)))
            .map(|(start, _)| start)
            .collect()
    }

    fn next_start_after(&self, key: &K) -> Option<&K> {
        self.buckets
            .range::<K, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(start, _)| start)
    }

    /// Buckets whose segment intersects `[from, to]`.
    fn affected_slots(&self, from: &K, to: &K) -> Vec<BucketSlot<K>> {
        let mut slots = vec![self.owner_slot(from)];
        slots.extend(
            self.starts_within(from, to)
                .into_iter()
                .map(|start| BucketSlot::Anchor(start.clone())),
        );
        slots
    }

    fn add_other(&mut self, portion: Arc<PortionInfo<K>>, now: DateTime<Utc>) {
        for slot in self.affected_slots(&portion.key_start, &portion.key_end) {
            self.with_rating(&slot, |bucket| bucket.add_other(portion.clone(), now));
        }
    }

    fn remove_other(&mut self, portion: &PortionInfo<K>) {
        for slot in self.affected_slots(&portion.key_start, &portion.key_end) {
            self.with_rating(&slot, |bucket| bucket.remove_other(portion));
        }
    }

    fn add_bucket(&mut self, anchor: Arc<PortionInfo<K>>) {
        let start = anchor.key_start.clone();
        assert!(
            !self.buckets.contains_key(&start),
            "a bucket already starts at {:?}",
            start
        );
        debug!(event = "bucket_created", anchor = %anchor.id, start = ?start);

        let mut bucket = PortionsBucket::new(Some(anchor), self.ctx.clone());
        let pred = self.predecessor_slot(&start);
        self.with_rating(&pred, |pred| pred.split_others_with(&mut bucket));

        self.rating
            .insert(bucket.weight(), BucketSlot::Anchor(start.clone()));
        self.buckets.insert(start, bucket);
    }

    /// Destroys the bucket anchored by `portion`, if there is one, folding
    /// its pool into the predecessor.
    fn remove_bucket(&mut self, portion: &PortionInfo<K>) -> bool {
        let is_anchor = self
            .buckets
            .get(&portion.key_start)
            .is_some_and(|bucket| bucket.anchor_id() == Some(portion.id));
        if !is_anchor {
            return false;
        }
        let Some(bucket) = self.buckets.remove(&portion.key_start) else {
            return false;
        };
        debug!(event = "bucket_removed", anchor = %portion.id, start = ?portion.key_start);

        self.rating
            .remove(bucket.weight(), &BucketSlot::Anchor(portion.key_start.clone()));
        let pred = self.predecessor_slot(&portion.key_start);
        self.with_rating(&pred, |pred| pred.merge_others_from(bucket));
        true
    }

    /// Decides whether a portion starts a bucket of its own instead of
    /// joining the pools of the buckets it intersects.
    pub fn is_anchor_worthy(&self, portion: &PortionInfo<K>, now: DateTime<Utc>) -> bool {
        if portion.is_small(self.ctx.config.small_portion_threshold_bytes) {
            return false;
        }
        if !self
            .starts_within(&portion.key_start, &portion.key_end)
            .is_empty()
        {
            return false;
        }
        let Some((_, pred)) = self.buckets.range::<K, _>(..=&portion.key_start).next_back() else {
            return true;
        };
        if self.next_start_after(&portion.key_start).is_none()
            && (self.ctx.freshness.is_fresh(now, portion.commit_time)
                || portion.produced == ProducedKind::Inserted)
        {
            return false;
        }
        pred.anchor()
            .is_some_and(|anchor| !anchor.crosses(portion))
    }

    pub fn add_portion(&mut self, portion: Arc<PortionInfo<K>>, now: DateTime<Utc>) {
        if portion.is_small(self.ctx.config.small_portion_threshold_bytes) {
            self.ctx.counters.small_portions.add_portion(&portion);
        }
        if self.is_anchor_worthy(&portion, now) {
            self.add_bucket(portion);
        } else {
            self.add_other(portion, now);
        }
        debug_assert!(self.validate());
    }

    pub fn remove_portion(&mut self, portion: &PortionInfo<K>) {
        if portion.is_small(self.ctx.config.small_portion_threshold_bytes) {
            self.ctx.counters.small_portions.remove_portion(portion);
        }
        if !self.remove_bucket(portion) {
            self.remove_other(portion);
        }
        debug_assert!(self.validate());
    }

    pub fn actualize(&mut self, now: DateTime<Utc>) {
        let slots: Vec<_> = std::iter::once(BucketSlot::Sentinel)
            .chain(self.buckets.keys().cloned().map(BucketSlot::Anchor))
            .collect();
        for slot in slots {
            self.with_rating(&slot, |bucket| bucket.actualize(now));
        }
    }

    /// Heaviest bucket weight.
    pub fn weight(&self) -> i64 {
        match self.rating.top() {
            Some((weight, _)) => weight,
            None => panic!("weight index is empty"),
        }
    }

    pub fn build_optimization_task(&self, busy_portions: &HashSet<PortionId>) -> Option<TaskDraft<K>> {
        let (weight, slot) = match self.rating.top() {
            Some(top) => top,
            None => panic!("weight index is empty"),
        };
        if weight <= 0 {
            return None;
        }
        let (bucket, next_border) = match slot {
            BucketSlot::Sentinel => (&self.left, self.buckets.keys().next()),
            BucketSlot::Anchor(start) => match self.buckets.get(start) {
                Some(bucket) => (bucket, self.next_start_after(start)),
                None => panic!("rated bucket at {:?} is not indexed", start),
            },
        };
        bucket.build_optimization_task(busy_portions, next_border)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.left.is_empty()
    }

    /// Tears the index down, taking everything it holds back out of the
    /// shared counters.
    pub fn release(self) {
        let threshold = self.ctx.config.small_portion_threshold_bytes;
        // Straddling portions sit in several pools but were counted once
        let mut small = BTreeMap::new();
        for bucket in std::iter::once(self.left).chain(self.buckets.into_values()) {
            small.extend(
                bucket
                    .portions()
                    .filter(|portion| portion.is_small(threshold))
                    .map(|portion| (portion.id, portion.clone())),
            );
            bucket.release();
        }
        for portion in small.values() {
            self.ctx.counters.small_portions.remove_portion(portion);
        }
    }

    /// Anchor start keys, in key order.
    pub fn bucket_positions(&self) -> Vec<K> {
        self.buckets.keys().cloned().collect()
    }

    pub fn bucket(&self, slot: &BucketSlot<K>) -> Option<&PortionsBucket<K>> {
        match slot {
            BucketSlot::Sentinel => Some(&self.left),
            BucketSlot::Anchor(start) => self.buckets.get(start),
        }
    }

    fn slots(&self) -> impl Iterator<Item = (BucketSlot<K>, &PortionsBucket<K>)> {
        std::iter::once((BucketSlot::Sentinel, &self.left)).chain(
            self.buckets
                .iter()
                .map(|(start, bucket)| (BucketSlot::Anchor(start.clone()), bucket)),
        )
    }

    /// Slots holding `id`, as anchor or in a pool.
    pub fn locate(&self, id: PortionId) -> Vec<BucketSlot<K>> {
        self.slots()
            .filter(|(_, bucket)| {
                bucket.anchor_id() == Some(id) || bucket.others().portion_ids().contains(&id)
            })
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Checks that every bucket is rated at its current weight and that
    /// next borders follow the key order. Panics on violation.
    pub fn validate(&self) -> bool {
        assert_eq!(
            self.rating.len(),
            self.buckets.len() + 1,
            "weight index and buckets disagree"
        );
        for (slot, bucket) in self.slots() {
            assert!(
                self.rating.contains(bucket.weight(), &slot),
                "bucket {:?} is not rated at its weight {}",
                slot,
                bucket.weight()
            );
        }
        assert_eq!(self.left.next_border(), self.buckets.keys().next());
        for (start, bucket) in &self.buckets {
            assert_eq!(
                bucket.next_border(),
                self.next_start_after(start),
                "bucket at {:?} has a stale next border",
                start
            );
        }
        true
    }

    pub fn snapshot(&self) -> IndexSnapshot<K> {
        IndexSnapshot {
            weight: self.weight(),
            buckets: self
                .slots()
                .map(|(slot, bucket)| BucketSnapshot {
                    slot,
                    anchor: bucket.anchor_id(),
                    next_border: bucket.next_border().cloned(),
                    weight: bucket.weight(),
                    pool: bucket.others().snapshot(),
                })
                .collect(),
        }
    }

    pub fn debug_string(&self) -> String {
        let mut out = format!(
            "{{buckets={};weight={};sentinel={};",
            self.buckets.len(),
            self.weight(),
            self.left.others().debug_string(false)
        );
        for (start, bucket) in &self.buckets {
            out.push_str(&format!(
                "{:?}=(w={};{});",
                start,
                bucket.weight(),
                bucket.others().debug_string(false)
            ));
        }
        out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compaction_common::{PlannerConfig, PlannerConfigBuilder, PlannerCounters, WeightPolicy};

    const F_MS: i64 = 300_000;
    const NOW: i64 = 10_000_000;
    const STALE: i64 = NOW - 2 * F_MS;
    const BIG: u64 = 2 << 20;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn index_with(config: PlannerConfig) -> (PortionBuckets<i64>, Arc<PlannerCounters>) {
        let counters = Arc::new(PlannerCounters::new());
        let ctx = PlannerContext::new(config, counters.clone()).unwrap();
        (PortionBuckets::new(ctx), counters)
    }

    fn index() -> (PortionBuckets<i64>, Arc<PlannerCounters>) {
        index_with(PlannerConfig::default())
    }

    fn big(id: u64, start: i64, end: i64) -> Arc<PortionInfo<i64>> {
        Arc::new(PortionInfo::new(id, start, end, BIG, 1000, at(STALE)))
    }

    fn small(id: u64, start: i64, end: i64) -> Arc<PortionInfo<i64>> {
        Arc::new(PortionInfo::new(id, start, end, 1000, 10, at(STALE)))
    }

    #[test]
    fn test_empty_index() {
        let (index, _) = index();
        assert!(index.is_empty());
        assert_eq!(index.weight(), 0);
        assert!(index.build_optimization_task(&HashSet::new()).is_none());
        assert!(index.validate());
    }

    #[test]
    fn test_small_portion_goes_to_sentinel() {
        let (mut index, counters) = index();
        index.add_portion(small(1, 0, 10), at(NOW));
        assert!(index.bucket_positions().is_empty());
        assert_eq!(index.locate(PortionId(1)), vec![BucketSlot::Sentinel]);
        assert_eq!(counters.snapshot().small_portions.count, 1);
        assert!(!index.is_empty());
    }

    #[test]
    fn test_first_large_portion_anchors() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));
        assert_eq!(index.bucket_positions(), vec![100]);
        assert_eq!(
            index.bucket(&BucketSlot::Sentinel).unwrap().next_border(),
            Some(&100)
        );
    }

    #[test]
    fn test_anchor_worthiness() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));

        // Covers an existing anchor start
        assert!(!index.is_anchor_worthy(&big(2, 50, 150), at(NOW)));
        // Crosses the preceding anchor
        assert!(!index.is_anchor_worthy(&big(3, 150, 250), at(NOW)));
        // Disjoint, after the last anchor, stale and compacted
        assert!(index.is_anchor_worthy(&big(4, 300, 400), at(NOW)));
        // Same but inserted
        let inserted = PortionInfo::new(5, 300, 400, BIG, 10, at(STALE))
            .with_produced(ProducedKind::Inserted);
        assert!(!index.is_anchor_worthy(&inserted, at(NOW)));
        // Same but fresh
        let fresh = PortionInfo::new(6, 300, 400, BIG, 10, at(NOW - 1));
        assert!(!index.is_anchor_worthy(&fresh, at(NOW)));
        // Left of every anchor
        assert!(index.is_anchor_worthy(&big(7, 0, 50), at(NOW)));
        // Small is never an anchor
        assert!(!index.is_anchor_worthy(&small(8, 0, 50), at(NOW)));
    }

    #[test]
    fn test_fresh_portion_between_anchors_can_anchor() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));
        index.add_portion(big(2, 500, 600), at(NOW));
        let fresh = PortionInfo::new(3, 300, 400, BIG, 10, at(NOW - 1));
        assert!(index.is_anchor_worthy(&fresh, at(NOW)));
    }

    #[test]
    fn test_straddling_portion_in_every_affected_bucket() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));
        index.add_portion(big(2, 300, 400), at(NOW));
        index.add_portion(small(10, 50, 350), at(NOW));

        assert_eq!(
            index.locate(PortionId(10)),
            vec![
                BucketSlot::Sentinel,
                BucketSlot::Anchor(100),
                BucketSlot::Anchor(300)
            ]
        );

        index.remove_portion(&small(10, 50, 350));
        assert!(index.locate(PortionId(10)).is_empty());
    }

    #[test]
    fn test_new_anchor_splits_predecessor() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));
        index.add_portion(small(10, 150, 160), at(NOW));
        index.add_portion(small(11, 250, 350), at(NOW));
        index.add_portion(small(12, 400, 410), at(NOW));

        index.add_portion(big(2, 300, 320), at(NOW));
        // 11 straddles the new start and stays on both sides
        assert_eq!(index.bucket_positions(), vec![100, 300]);
        assert_eq!(index.locate(PortionId(10)), vec![BucketSlot::Anchor(100)]);
        assert_eq!(
            index.locate(PortionId(11)),
            vec![BucketSlot::Anchor(100), BucketSlot::Anchor(300)]
        );
        assert_eq!(index.locate(PortionId(12)), vec![BucketSlot::Anchor(300)]);
        assert!(index.validate());
    }

    #[test]
    fn test_removing_anchor_merges_into_predecessor() {
        let (mut index, counters) = index();
        let anchor = big(1, 100, 200);
        index.add_portion(anchor.clone(), at(NOW));
        index.add_portion(small(10, 50, 150), at(NOW));
        index.add_portion(small(11, 300, 310), at(NOW));

        index.remove_portion(&anchor);
        assert!(index.bucket_positions().is_empty());
        assert_eq!(index.locate(PortionId(10)), vec![BucketSlot::Sentinel]);
        assert_eq!(index.locate(PortionId(11)), vec![BucketSlot::Sentinel]);
        assert!(index.bucket(&BucketSlot::Sentinel).unwrap().is_final());

        let snap = counters.snapshot();
        assert_eq!(snap.portions_alone.count, 0);
        assert_eq!(snap.buckets_for_merge, 0);
        assert_eq!(snap.actual_portions.count, 2);
        assert!(index.validate());
    }

    #[test]
    fn test_heaviest_bucket_is_selected() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));
        index.add_portion(big(2, 300, 400), at(NOW));
        // Non-final bucket at 100 with one other
        index.add_portion(small(10, 150, 160), at(NOW));

        let draft = index.build_optimization_task(&HashSet::new()).unwrap();
        let mut ids: Vec<_> = draft.portions.iter().map(|p| p.id.0).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 10]);
        assert!(!draft.is_final);
        assert_eq!(index.weight(), (10_000_000_000 * 2 - (BIG as i64 + 1000)) * 10);
    }

    #[test]
    fn test_equal_weights_prefer_lowest_slot() {
        let mut rating = WeightIndex::<i64>::new();
        rating.insert(5, BucketSlot::Anchor(300));
        rating.insert(5, BucketSlot::Anchor(100));
        rating.insert(1, BucketSlot::Sentinel);
        assert_eq!(rating.top(), Some((5, &BucketSlot::Anchor(100))));

        rating.insert(5, BucketSlot::Sentinel);
        assert_eq!(rating.top(), Some((5, &BucketSlot::Sentinel)));

        rating.remove(5, &BucketSlot::Sentinel);
        rating.remove(5, &BucketSlot::Anchor(100));
        rating.remove(5, &BucketSlot::Anchor(300));
        assert_eq!(rating.top(), Some((1, &BucketSlot::Sentinel)));
        assert_eq!(rating.len(), 1);
    }

    #[test]
    #[should_panic(expected = "not rated")]
    fn test_unrated_removal_panics() {
        let mut rating = WeightIndex::<i64>::new();
        rating.insert(5, BucketSlot::Anchor(300));
        rating.remove(5, &BucketSlot::Anchor(100));
    }

    #[test]
    fn test_force_compact_selects_sentinel() {
        let config = PlannerConfigBuilder::default()
            .weight_policy(WeightPolicy::ForceCompact)
            .build()
            .unwrap();
        let (mut index, _) = index_with(config);
        index.add_portion(big(1, 100, 200), at(NOW));
        index.add_portion(small(10, 0, 10), at(NOW));
        index.add_portion(small(11, 20, 30), at(NOW));

        let draft = index.build_optimization_task(&HashSet::new()).unwrap();
        let mut ids: Vec<_> = draft.portions.iter().map(|p| p.id.0).collect();
        ids.sort();
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(
            draft.checkpoints,
            vec![compaction_proto::Checkpoint::stop_point(100)]
        );
    }

    #[test]
    fn test_actualize_rerates_buckets() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));
        index.add_portion(big(2, 300, 400), at(NOW));
        let fresh = Arc::new(PortionInfo::new(10, 150, 160, 1000, 10, at(NOW)));
        index.add_portion(fresh, at(NOW));
        assert_eq!(index.weight(), 0);

        index.actualize(at(NOW + F_MS));
        assert!(index.weight() > 0);
        assert!(index.validate());
    }

    #[test]
    fn test_snapshot_serializes() {
        let (mut index, _) = index();
        index.add_portion(big(1, 100, 200), at(NOW));
        index.add_portion(small(10, 0, 10), at(NOW));

        let value = serde_json::to_value(index.snapshot()).unwrap();
        assert_eq!(value["buckets"].as_array().unwrap().len(), 2);
        assert_eq!(value["buckets"][0]["slot"], "Sentinel");
        assert_eq!(value["buckets"][1]["slot"]["Anchor"], 100);
        assert!(index.debug_string().starts_with("{buckets=1;"));
    }
}
