//! Relationship cache.
//!
//! Bounded per-vehicle memory of partner quality with strict LRU eviction,
//! backed by `lru::LruCache`. The current leader is never the one evicted.

use crate::core::vehicle::VehicleId;
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;

/// What a vehicle remembers about one candidate.
///
/// `primary`/`secondary` are policy-specific: running mean (ε-greedy),
/// mean and variance (Bayes-UCB), or Beta α and β (Thompson sampling).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HappinessRecord {
    /// Happiness reported under the active happiness mode.
    pub reward: f64,
    pub visits: u32,
    pub primary: f64,
    pub secondary: f64,
}

#[derive(Clone, Debug)]
pub struct RelationshipCache {
    capacity: usize,
    /// One slot of headroom: an insert lands first, then the victim is chosen.
    entries: LruCache<VehicleId, HappinessRecord>,
}

impl RelationshipCache {
    pub fn new(capacity: usize) -> Self {
        RelationshipCache {
            capacity,
            entries: LruCache::new(NonZeroUsize::MIN.saturating_add(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: VehicleId) -> bool {
        self.entries.contains(&id)
    }

    /// Read without touching recency.
    pub fn get(&self, id: VehicleId) -> Option<&HappinessRecord> {
        self.entries.peek(&id)
    }

    /// Reported reward, 0 for unknown candidates.
    pub fn reward(&self, id: VehicleId) -> f64 {
        self.get(id).map_or(0.0, |r| r.reward)
    }

    /// Visit count, 0 for unknown candidates.
    pub fn visits(&self, id: VehicleId) -> u32 {
        self.get(id).map_or(0, |r| r.visits)
    }

    /// Write back an observation for `id`.
    ///
    /// An existing record gets its visit count bumped; a new one starts at one
    /// visit. Either way the record becomes most recent. On overflow the least
    /// recent record is evicted, except `protected` (the current leader), which
    /// is refreshed instead so the next least recent record goes. Returns the
    /// evicted id.
    pub fn update(
        &mut self,
        id: VehicleId,
        reward: f64,
        primary: f64,
        secondary: f64,
        protected: Option<VehicleId>,
    ) -> Option<VehicleId> {
        if let Some(record) = self.entries.get_mut(&id) {
            record.visits += 1;
            record.reward = reward;
            record.primary = primary;
            record.secondary = secondary;
            return None;
        }

        self.entries.push(
            id,
            HappinessRecord {
                reward,
                visits: 1,
                primary,
                secondary,
            },
        );
        if self.entries.len() <= self.capacity {
            return None;
        }

        let (mut victim, record) = self.entries.pop_lru()?;
        if Some(victim) == protected {
            self.entries.push(victim, record);
            victim = self.entries.pop_lru()?.0;
        }
        Some(victim)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Records from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = (VehicleId, &HappinessRecord)> + '_ {
        self.entries.iter().map(|(id, record)| (*id, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: VehicleId = VehicleId(1);
    const B: VehicleId = VehicleId(2);
    const C: VehicleId = VehicleId(3);
    const D: VehicleId = VehicleId(4);

    fn order(cache: &RelationshipCache) -> Vec<VehicleId> {
        cache.iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn evicts_least_recent() {
        let mut cache = RelationshipCache::new(2);
        cache.update(A, 0.1, 0.0, 0.0, None);
        cache.update(B, 0.2, 0.0, 0.0, None);
        let evicted = cache.update(C, 0.3, 0.0, 0.0, None);
        assert_eq!(evicted, Some(A));
        assert_eq!(order(&cache), vec![C, B]);
    }

    #[test]
    fn leader_record_survives_overflow() {
        let mut cache = RelationshipCache::new(2);
        cache.update(A, 0.9, 0.0, 0.0, Some(A));
        cache.update(B, 0.5, 0.0, 0.0, Some(A));
        let evicted = cache.update(C, 0.4, 0.0, 0.0, Some(A));
        assert_eq!(evicted, Some(B));
        assert!(cache.contains(A));
        assert!(cache.contains(C));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn update_in_place_counts_and_refreshes() {
        let mut cache = RelationshipCache::new(3);
        cache.update(A, 0.1, 0.0, 0.0, None);
        cache.update(B, 0.2, 0.0, 0.0, None);
        cache.update(A, 0.7, 0.5, 0.0, None);
        assert_eq!(order(&cache), vec![A, B]);
        let record = cache.get(A).unwrap();
        assert_eq!(record.visits, 2);
        assert_eq!(record.reward, 0.7);
        assert_eq!(record.primary, 0.5);

        cache.update(C, 0.3, 0.0, 0.0, None);
        assert_eq!(cache.update(D, 0.4, 0.0, 0.0, None), Some(B));
        assert_eq!(order(&cache), vec![D, C, A]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = RelationshipCache::new(5);
        for i in 0..100 {
            cache.update(VehicleId(i), i as f64 / 100.0, 0.0, 0.0, Some(VehicleId(0)));
            assert!(cache.len() <= 5);
        }
        assert!(cache.contains(VehicleId(0)));
        assert_eq!(order(&cache)[0], VehicleId(99));
    }

    #[test]
    fn protected_leader_is_refreshed_when_it_was_least_recent() {
        let mut cache = RelationshipCache::new(3);
        cache.update(A, 0.9, 0.0, 0.0, Some(A));
        cache.update(B, 0.5, 0.0, 0.0, Some(A));
        cache.update(C, 0.4, 0.0, 0.0, Some(A));
        assert_eq!(cache.update(D, 0.3, 0.0, 0.0, Some(A)), Some(B));
        assert_eq!(order(&cache), vec![A, D, C]);
    }

    #[test]
    fn capacity_one_keeps_the_leader() {
        let mut cache = RelationshipCache::new(1);
        cache.update(A, 0.9, 0.0, 0.0, Some(A));
        assert_eq!(cache.update(B, 0.5, 0.0, 0.0, Some(A)), Some(B));
        assert_eq!(order(&cache), vec![A]);
    }

    #[test]
    fn unknown_candidates_read_as_zero() {
        let cache = RelationshipCache::new(2);
        assert_eq!(cache.reward(A), 0.0);
        assert_eq!(cache.visits(A), 0);
    }
}
