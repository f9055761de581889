//! Commit policy.
//!
//! Turns the cache contents into an actual partner decision once visit and
//! distance thresholds hold and switching would pay off.

use super::policy::PolicyKind;
use super::reward::RewardModel;
use crate::core::config::PlatoonConfig;
use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::{LifecycleState, VehicleId};
use tracing::debug;

/// Visits per candidate a platooned vehicle needs before trusting the best one.
const VISITS_PER_CANDIDATE: f64 = 2.5;

#[derive(Clone, Debug)]
pub struct CommitPolicy {
    kind: PolicyKind,
    margin: f64,
    visit_floor: u32,
    detection_radius: f64,
}

impl CommitPolicy {
    pub fn new(config: &PlatoonConfig) -> Self {
        CommitPolicy {
            kind: config.decision.policy,
            margin: config.decision.changing_margin,
            visit_floor: config.decision.visit_floor,
            detection_radius: config.detection_radius,
        }
    }

    pub fn required_visits(&self, candidates: usize) -> u32 {
        let scaled = (candidates as f64 * VISITS_PER_CANDIDATE).ceil() as u32;
        self.visit_floor.max(scaled)
    }

    /// The partner `car` should move to, if any.
    pub fn choose(&self, registry: &VehicleRegistry, reward: &RewardModel, car: VehicleId) -> Option<VehicleId> {
        let vehicle = registry.get(car)?;
        let candidates = &vehicle.candidates;

        let mut best = None;
        let mut best_value = 0.0;
        for &candidate in candidates {
            if let Some(record) = vehicle.cache.get(candidate) {
                if record.reward > best_value {
                    best_value = record.reward;
                    best = Some(candidate);
                }
            }
        }
        let best = best?;

        if best == vehicle.platoon_leader() {
            return None;
        }

        let distance = registry.distance(car, best)?;
        let in_range = distance > 0.0 && distance < self.detection_radius;

        if !self.kind.is_learning() {
            return in_range.then_some(best);
        }

        if vehicle.is_in_platoon() {
            let staying = reward.reported(registry, car, vehicle.platoon_leader()).unwrap_or(0.0);
            if staying + self.margin > best_value {
                debug!(
                    "[Commit] {} stays: {:.3} + {:.3} > {:.3} for {}",
                    car, staying, self.margin, best_value, best
                );
                return None;
            }
        }

        let explored = vehicle.cache.visits(best) >= self.required_visits(candidates.len())
            || vehicle.state == LifecycleState::SingleCar;
        (explored && in_range).then_some(best)
    }
}
