use super::policy::{PartnerPolicy, PolicyKind, Selection};
use crate::core::vehicle::VehicleId;

/// Non-learning nearest-fit baseline.
///
/// Weighs speed deviation (in km/h) against forward distance among single
/// cars and platoons, and keeps only the winner in the cache.
#[derive(Clone, Copy, Debug, Default)]
pub struct Heinovski;

const SPEED_WEIGHT: f64 = 0.6;
const DISTANCE_WEIGHT: f64 = 0.4;
const MS_TO_KMH: f64 = 3.6;
/// Stand-in distance for vehicles behind.
const BEHIND: f64 = 9999.0;
const COST_CEILING: f64 = 1000.0;

impl Heinovski {
    pub fn cost(desired_speed: f64, candidate_speed: f64, distance: f64) -> f64 {
        let distance = if distance < 0.0 { BEHIND } else { distance };
        SPEED_WEIGHT * (desired_speed - candidate_speed).abs() * MS_TO_KMH + DISTANCE_WEIGHT * distance
    }
}

impl PartnerPolicy for Heinovski {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Heinovski
    }

    fn select(&self, ctx: &mut Selection<'_>) -> Option<VehicleId> {
        let desired = ctx.registry.get(ctx.car)?.desired_speed();

        let mut best = None;
        let mut best_cost = COST_CEILING;
        for &candidate in ctx.candidates {
            let Some(other) = ctx.registry.get(candidate) else {
                continue;
            };
            if !other.state.is_addressable() {
                continue;
            }
            let Some(distance) = ctx.registry.distance(ctx.car, candidate) else {
                continue;
            };
            let cost = Self::cost(desired, other.telemetry.speed, distance);
            if cost < best_cost {
                best_cost = cost;
                best = Some(candidate);
            }
        }

        ctx.cache.clear();
        if let Some(id) = best {
            ctx.record(id, 1.0, 0.0, 0.0);
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vehicle::LifecycleState;
    use crate::learning::cache::RelationshipCache;
    use crate::learning::policy::fixtures;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn vehicles_behind_are_penalized() {
        assert_eq!(Heinovski::cost(30.0, 30.0, 50.0), 20.0);
        assert!(Heinovski::cost(30.0, 30.0, -5.0) > COST_CEILING);
    }

    #[test]
    fn picks_cheapest_addressable_candidate_and_resets_cache() {
        let mut registry = fixtures::registry(&[(2, 40.0, 25.0), (3, 60.0, 30.0), (4, 30.0, 30.0)]);
        for id in [1, 2, 3] {
            registry.get_mut(VehicleId(id)).unwrap().state = LifecycleState::SingleCar;
        }
        // closest and matching speed, but mid-maneuver
        registry.get_mut(VehicleId(4)).unwrap().state = LifecycleState::JoiningProcess;

        let reward = fixtures::reward();
        let mut cache = RelationshipCache::new(5);
        cache.update(VehicleId(9), 0.9, 0.0, 0.0, None);
        let mut rng = StdRng::seed_from_u64(0);
        let candidates = [VehicleId(2), VehicleId(3), VehicleId(4)];
        let mut ctx = Selection {
            car: VehicleId(1),
            candidates: &candidates,
            registry: &registry,
            reward: &reward,
            cache: &mut cache,
            leader: VehicleId(1),
            rng: &mut rng,
        };

        // v2: 0.6·5·3.6 + 0.4·36 = 25.2; v3: 0.4·56 = 22.4
        assert_eq!(Heinovski.select(&mut ctx), Some(VehicleId(3)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.reward(VehicleId(3)), 1.0);
    }
}
