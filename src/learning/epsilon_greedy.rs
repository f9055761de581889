use super::policy::{last_best, PartnerPolicy, PolicyKind, Selection};
use crate::core::vehicle::VehicleId;
use rand::Rng;

/// ε-greedy: explore uniformly with probability ε, otherwise exploit the best running mean.
///
/// `primary` holds the running mean of instantaneous happiness.
#[derive(Clone, Debug)]
pub struct EpsilonGreedy {
    epsilon: f64,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f64) -> Self {
        EpsilonGreedy { epsilon }
    }
}

impl PartnerPolicy for EpsilonGreedy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::EpsilonGreedy
    }

    fn select(&self, ctx: &mut Selection<'_>) -> Option<VehicleId> {
        let arms = ctx.arms();
        if arms.is_empty() {
            return None;
        }

        let (chosen, current) = if ctx.rng.gen::<f64>() < self.epsilon {
            arms[ctx.rng.gen_range(0..arms.len())]
        } else {
            for &(id, h) in &arms {
                if !ctx.cache.contains(id) {
                    ctx.record(id, h, h, 0.0);
                }
            }
            let means: Vec<(VehicleId, f64)> = arms
                .iter()
                .map(|&(id, _)| (id, ctx.cache.get(id).map_or(0.0, |r| r.primary)))
                .collect();
            let best = last_best(means)?;
            arms.iter().copied().find(|(id, _)| *id == best)?
        };

        let (n, mean) = ctx
            .cache
            .get(chosen)
            .map_or((0.0, 0.0), |r| (r.visits as f64, r.primary));
        let mean = (current + n * mean) / (n + 1.0);
        let reported = ctx.reported(chosen, current);
        ctx.record(chosen, reported, mean, 0.0);
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::cache::RelationshipCache;
    use crate::learning::policy::fixtures;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const A: VehicleId = VehicleId(2);
    const B: VehicleId = VehicleId(3);

    fn seeded_cache() -> RelationshipCache {
        let mut cache = RelationshipCache::new(5);
        for (id, mean) in [(A, 0.8), (B, 0.3)] {
            for _ in 0..10 {
                cache.update(id, mean, mean, 0.0, None);
            }
        }
        cache
    }

    #[test]
    fn zero_epsilon_always_exploits() {
        let registry = fixtures::registry(&[(2, 40.0, 30.0), (3, 60.0, 30.0)]);
        let reward = fixtures::reward();
        let mut cache = seeded_cache();
        let mut rng = StdRng::seed_from_u64(7);
        let policy = EpsilonGreedy::new(0.0);
        let candidates = [A, B];

        for _ in 0..20 {
            let mut ctx = Selection {
                car: VehicleId(1),
                candidates: &candidates,
                registry: &registry,
                reward: &reward,
                cache: &mut cache,
                leader: VehicleId(1),
                rng: &mut rng,
            };
            assert_eq!(policy.select(&mut ctx), Some(A));
        }
        assert_eq!(cache.visits(A), 30);
        assert_eq!(cache.visits(B), 10);
    }

    #[test]
    fn unseen_candidates_are_seeded_with_current_happiness() {
        let registry = fixtures::registry(&[(2, 40.0, 30.0)]);
        let reward = fixtures::reward();
        let mut cache = RelationshipCache::new(5);
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = [A];
        let mut ctx = Selection {
            car: VehicleId(1),
            candidates: &candidates,
            registry: &registry,
            reward: &reward,
            cache: &mut cache,
            leader: VehicleId(1),
            rng: &mut rng,
        };
        assert_eq!(EpsilonGreedy::new(0.0).select(&mut ctx), Some(A));

        let h = reward.current(&registry, VehicleId(1), A).unwrap();
        let record = cache.get(A).unwrap();
        assert_eq!(record.visits, 2);
        assert!((record.primary - h).abs() < 1e-12);
        assert!((record.reward - h).abs() < 1e-12);
    }

    #[test]
    fn full_exploration_still_picks_a_candidate() {
        let registry = fixtures::registry(&[(2, 40.0, 30.0), (3, 60.0, 30.0)]);
        let reward = fixtures::reward();
        let mut cache = RelationshipCache::new(5);
        let mut rng = StdRng::seed_from_u64(11);
        let candidates = [A, B];
        for _ in 0..10 {
            let mut ctx = Selection {
                car: VehicleId(1),
                candidates: &candidates,
                registry: &registry,
                reward: &reward,
                cache: &mut cache,
                leader: VehicleId(1),
                rng: &mut rng,
            };
            let chosen = EpsilonGreedy::new(1.0).select(&mut ctx).unwrap();
            assert!(candidates.contains(&chosen));
        }
        assert_eq!(cache.visits(A) + cache.visits(B), 10);
    }

    #[test]
    fn stale_candidates_yield_nothing() {
        let registry = fixtures::registry(&[]);
        let reward = fixtures::reward();
        let mut cache = RelationshipCache::new(5);
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = [VehicleId(42)];
        let mut ctx = Selection {
            car: VehicleId(1),
            candidates: &candidates,
            registry: &registry,
            reward: &reward,
            cache: &mut cache,
            leader: VehicleId(1),
            rng: &mut rng,
        };
        assert_eq!(EpsilonGreedy::new(0.1).select(&mut ctx), None);
        assert!(cache.is_empty());
    }
}
