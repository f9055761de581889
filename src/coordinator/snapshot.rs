//! Read-only views of the coordinator state for monitoring and the Python side.

use crate::core::error::Result;
use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::{LifecycleState, VehicleId};
use crate::learning::cache::HappinessRecord;
use crate::learning::reward::{Happiness, RewardModel};
use crate::platoon::lifecycle::Counters;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    pub state: LifecycleState,
    pub leader: Option<VehicleId>,
    pub platoon_size: usize,
    pub position: Option<usize>,
    pub desired_speed: f64,
    pub platoon_speed: f64,
    pub speed: f64,
    /// Toward the own leader; `None` while unplatooned.
    pub happiness: Option<Happiness>,
    pub candidates: usize,
    /// Most recently used first.
    pub cache: Vec<(VehicleId, HappinessRecord)>,
}

impl VehicleSnapshot {
    pub fn capture(registry: &VehicleRegistry, reward: &RewardModel, id: VehicleId) -> Option<Self> {
        let vehicle = registry.get(id)?;
        let leader = vehicle.leader;
        let platoon_size = leader
            .and_then(|l| registry.get(l))
            .map_or(1, |l| l.platoon_members().len());
        let happiness = leader.and_then(|l| reward.evaluate(registry, id, l));

        Some(VehicleSnapshot {
            id,
            state: vehicle.state,
            leader,
            platoon_size,
            position: registry.position_in_platoon(id),
            desired_speed: vehicle.desired_speed(),
            platoon_speed: vehicle.desired_platoon_speed(),
            speed: vehicle.telemetry.speed,
            happiness,
            candidates: vehicle.candidates.len(),
            cache: vehicle.cache.iter().map(|(k, r)| (k, *r)).collect(),
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FleetSnapshot {
    pub tick: u64,
    pub vehicles: usize,
    /// Vehicle count per lifecycle state, in lifecycle order.
    pub states: Vec<(LifecycleState, usize)>,
    pub platoons: usize,
    pub mean_platoon_size: f64,
    /// Mean happiness of followers toward their leader.
    pub mean_happiness: f64,
    pub counters: Counters,
}

impl FleetSnapshot {
    pub fn capture(registry: &VehicleRegistry, reward: &RewardModel, counters: Counters, tick: u64) -> Self {
        let states = LifecycleState::ALL
            .iter()
            .map(|s| (*s, registry.iter().filter(|v| v.state == *s).count()))
            .collect();

        let sizes: Vec<usize> = registry
            .iter()
            .filter(|v| v.is_leader)
            .map(|v| v.members.len())
            .collect();
        let mean_platoon_size = if sizes.is_empty() {
            0.0
        } else {
            sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
        };

        let happiness: Vec<f64> = registry
            .iter()
            .filter(|v| v.is_in_platoon() && !v.is_leader)
            .filter_map(|v| reward.current(registry, v.id, v.platoon_leader()))
            .collect();
        let mean_happiness = if happiness.is_empty() {
            0.0
        } else {
            happiness.iter().sum::<f64>() / happiness.len() as f64
        };

        FleetSnapshot {
            tick,
            vehicles: registry.len(),
            states,
            platoons: sizes.len(),
            mean_platoon_size,
            mean_happiness,
            counters,
        }
    }

    pub fn count(&self, state: LifecycleState) -> usize {
        self.states
            .iter()
            .find(|(s, _)| *s == state)
            .map_or(0, |(_, n)| *n)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PlatoonConfig;
    use crate::core::world::Outbox;
    use crate::platoon::topology::fixtures::{form, registry};
    use crate::platoon::topology::Topology;

    #[test]
    fn fleet_snapshot_counts_platoons() {
        let config = PlatoonConfig::default();
        let reward = RewardModel::new(&config);
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0), (3, 80.0, 0), (4, 0.0, 1)]);
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        form(&mut topology, &[1, 2, 3]);

        let snapshot = FleetSnapshot::capture(&registry, &reward, Counters::default(), 7);
        assert_eq!(snapshot.platoons, 1);
        assert_eq!(snapshot.mean_platoon_size, 3.0);
        assert_eq!(snapshot.count(LifecycleState::Platoon), 3);
        assert_eq!(snapshot.count(LifecycleState::SingleCar), 1);
        assert!(snapshot.mean_happiness > 0.0 && snapshot.mean_happiness <= 1.0);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"tick\":7"));
    }

    #[test]
    fn vehicle_snapshot_reports_position_and_happiness() {
        let config = PlatoonConfig::default();
        let reward = RewardModel::new(&config);
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0), (4, 0.0, 1)]);
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        form(&mut topology, &[1, 2]);

        let member = VehicleSnapshot::capture(&registry, &reward, VehicleId(2)).unwrap();
        assert_eq!(member.position, Some(1));
        assert_eq!(member.platoon_size, 2);
        assert!(member.happiness.is_some());

        let single = VehicleSnapshot::capture(&registry, &reward, VehicleId(4)).unwrap();
        assert_eq!(single.platoon_size, 1);
        assert!(single.happiness.is_none());
        assert!(VehicleSnapshot::capture(&registry, &reward, VehicleId(9)).is_none());
    }
}
