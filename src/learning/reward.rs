//! Happiness model
//!
//! Scores how well a vehicle fits a candidate partner from speed match,
//! platoon size, route overlap and proximity. Every component lies in [0, 1].

use crate::core::config::{HappinessMode, PlatoonConfig, RewardWeights};
use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::VehicleId;
use crate::learning::cache::RelationshipCache;
use serde::Serialize;

/// Weighted happiness plus its four components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Happiness {
    pub total: f64,
    pub speed: f64,
    pub size: f64,
    pub end: f64,
    pub gap: f64,
}

#[derive(Clone, Debug)]
pub struct RewardModel {
    weights: RewardWeights,
    detection_radius: f64,
    mode: HappinessMode,
}

impl RewardModel {
    pub fn new(config: &PlatoonConfig) -> Self {
        RewardModel {
            weights: config.weights.clone(),
            detection_radius: config.detection_radius,
            mode: config.decision.happiness_mode,
        }
    }

    pub fn speed_happiness(&self, desired_speed: f64, neighbor_speed: f64) -> f64 {
        let eps = self.weights.speed_epsilon;
        let a = (desired_speed - self.weights.speed_offset).max(eps);
        let b = (neighbor_speed - self.weights.speed_offset).max(eps);
        (a / b).min(b / a)
    }

    pub fn size_happiness(platoon_size: usize) -> f64 {
        if platoon_size == 0 {
            return 0.0;
        }
        1.0 - 1.0 / platoon_size as f64
    }

    /// `remaining` of the vehicle against the farthest-going member of the candidate platoon.
    pub fn end_happiness(remaining: f64, farthest_member_remaining: f64) -> f64 {
        if farthest_member_remaining <= 0.0 {
            return 0.0;
        }
        (remaining / farthest_member_remaining).clamp(0.0, 1.0)
    }

    pub fn gap_happiness(&self, distance: f64) -> f64 {
        (1.0 - distance / self.detection_radius).clamp(0.0, 1.0)
    }

    /// Instantaneous happiness of `car` toward `neighbor`. `None` if either is gone.
    pub fn evaluate(
        &self,
        registry: &VehicleRegistry,
        car: VehicleId,
        neighbor: VehicleId,
    ) -> Option<Happiness> {
        let vehicle = registry.get(car)?;
        let other = registry.get(neighbor)?;
        let members = other.platoon_members();

        let platoon_size = if vehicle.platoon_leader() == neighbor {
            members.len()
        } else {
            members.len() + 1
        };

        let farthest = members
            .iter()
            .filter(|m| **m != car)
            .filter_map(|m| registry.get(*m))
            .map(|m| m.telemetry.distance_to_end)
            .fold(0.0_f64, f64::max);

        let distance = registry.distance(car, neighbor)?;

        let speed = self.speed_happiness(vehicle.desired_speed(), other.telemetry.speed);
        let size = Self::size_happiness(platoon_size);
        let end = Self::end_happiness(vehicle.telemetry.distance_to_end, farthest);
        let gap = self.gap_happiness(distance);

        let w = &self.weights;
        let weight_sum = w.total();
        let total = if weight_sum > 0.0 {
            (w.speed * speed + w.size * size + w.end * end + w.gap * gap) / weight_sum
        } else {
            0.0
        };

        Some(Happiness {
            total: total.clamp(0.0, 1.0),
            speed,
            size,
            end,
            gap,
        })
    }

    pub fn current(&self, registry: &VehicleRegistry, car: VehicleId, neighbor: VehicleId) -> Option<f64> {
        self.evaluate(registry, car, neighbor).map(|h| h.total)
    }

    /// Happiness as written back to the cache: instantaneous, or folded into
    /// the cached value as a running mean.
    pub fn reported(&self, registry: &VehicleRegistry, car: VehicleId, neighbor: VehicleId) -> Option<f64> {
        let current = self.current(registry, car, neighbor)?;
        let cache = &registry.get(car)?.cache;
        Some(self.fold(current, cache, neighbor))
    }

    /// Apply the happiness mode to an instantaneous value.
    pub fn fold(&self, current: f64, cache: &RelationshipCache, neighbor: VehicleId) -> f64 {
        match self.mode {
            HappinessMode::Current => current,
            HappinessMode::Mean => {
                let n = cache.visits(neighbor) as f64;
                (current + n * cache.reward(neighbor)) / (n + 1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vehicle::{Telemetry, Vehicle};

    fn model() -> RewardModel {
        RewardModel::new(&PlatoonConfig::default())
    }

    fn vehicle(id: u32, x: f64, speed: f64, remaining: f64) -> Vehicle {
        Vehicle::new(
            VehicleId(id),
            Telemetry {
                x,
                speed,
                max_speed: 40.0,
                desired_speed_factor: 0.75,
                distance_to_end: remaining,
                road: "E2".to_string(),
                ..Telemetry::default()
            },
            5,
        )
    }

    #[test]
    fn equal_speeds_are_perfectly_happy() {
        assert_eq!(model().speed_happiness(30.0, 30.0), 1.0);
        let h = model().speed_happiness(30.0, 41.0);
        assert!((h - 0.5).abs() < 1e-12);
    }

    #[test]
    fn near_standstill_does_not_divide_by_zero() {
        let h = model().speed_happiness(5.0, 30.0);
        assert!(h > 0.0 && h < 0.01);
    }

    #[test]
    fn platoon_of_four() {
        assert_eq!(RewardModel::size_happiness(4), 0.75);
        assert_eq!(RewardModel::size_happiness(1), 0.0);
    }

    #[test]
    fn end_happiness_degenerate_members() {
        assert_eq!(RewardModel::end_happiness(500.0, 0.0), 0.0);
        assert_eq!(RewardModel::end_happiness(500.0, 1000.0), 0.5);
        assert_eq!(RewardModel::end_happiness(2000.0, 1000.0), 1.0);
    }

    #[test]
    fn gap_happiness_saturates() {
        let m = model();
        assert_eq!(m.gap_happiness(0.0), 1.0);
        assert_eq!(m.gap_happiness(75.0), 0.5);
        assert_eq!(m.gap_happiness(300.0), 0.0);
        assert_eq!(m.gap_happiness(-4.0), 1.0);
    }

    #[test]
    fn combined_happiness_is_weighted_and_bounded() {
        let mut registry = VehicleRegistry::new(4.0);
        registry.insert(vehicle(1, 0.0, 30.0, 4000.0));
        registry.insert(vehicle(2, 79.0, 30.0, 8000.0));

        let h = model().evaluate(&registry, VehicleId(1), VehicleId(2)).unwrap();
        // desired 30 vs 30 → 1; size 2 → 0.5; end 0.5; gap 1 - 75/150 = 0.5
        assert_eq!(h.speed, 1.0);
        assert_eq!(h.size, 0.5);
        assert_eq!(h.end, 0.5);
        assert_eq!(h.gap, 0.5);
        assert!((h.total - (2.0 * 1.0 + 2.0 * 0.5 + 0.5 + 0.5) / 6.0).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&h.total));
    }

    #[test]
    fn stale_neighbor_yields_none() {
        let mut registry = VehicleRegistry::new(4.0);
        registry.insert(vehicle(1, 0.0, 30.0, 4000.0));
        assert!(model().evaluate(&registry, VehicleId(1), VehicleId(9)).is_none());
    }

    #[test]
    fn mean_mode_folds_cached_reward() {
        let mut cfg = PlatoonConfig::default();
        cfg.decision.happiness_mode = HappinessMode::Mean;
        let m = RewardModel::new(&cfg);

        let mut registry = VehicleRegistry::new(4.0);
        registry.insert(vehicle(1, 0.0, 30.0, 4000.0));
        registry.insert(vehicle(2, 79.0, 30.0, 8000.0));
        let current = m.current(&registry, VehicleId(1), VehicleId(2)).unwrap();
        registry
            .get_mut(VehicleId(1))
            .unwrap()
            .cache
            .update(VehicleId(2), 0.0, 0.0, 0.0, None);

        let reported = m.reported(&registry, VehicleId(1), VehicleId(2)).unwrap();
        assert!((reported - current / 2.0).abs() < 1e-12);
    }
}
