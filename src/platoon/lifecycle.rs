//! Per-vehicle lifecycle state machine.
//!
//! One `step` per vehicle per tick. Transitions call into the topology
//! operations; the partner decision (if any) is made by the selector before
//! the step and handed in.

use super::maneuvers::JoinProgress;
use super::topology::{MergeOutcome, Topology};
use crate::core::vehicle::{LifecycleState, VehicleId};
use crate::learning::reward::RewardModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Run-level event counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub crashes: u64,
    /// Platoon members that started leaving for a better platoon.
    pub changes: u64,
    pub merges: u64,
    pub change_aborts: u64,
    pub merge_aborts: u64,
}

impl Counters {
    pub fn add(&mut self, other: &Counters) {
        self.crashes += other.crashes;
        self.changes += other.changes;
        self.merges += other.merges;
        self.change_aborts += other.change_aborts;
        self.merge_aborts += other.merge_aborts;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeScope {
    /// The vehicle that switched platoons.
    Vehicle,
    /// Summed over the members of the platoon it joined.
    Platoon,
}

/// Happiness gained (negative: lost) by a completed or aborted platoon switch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HappinessChange {
    pub tick: u64,
    pub vehicle: VehicleId,
    pub scope: ChangeScope,
    pub gain: f64,
}

/// Everything besides the topology a state handler may touch.
pub struct Lifecycle<'a, 'b> {
    pub topology: &'a mut Topology<'b>,
    pub reward: &'a RewardModel,
    /// Whether the active policy learns; the baseline never merges or switches.
    pub learning: bool,
    pub counters: &'a mut Counters,
    pub changes: &'a mut Vec<HappinessChange>,
    pub tick: u64,
    /// Bandit evaluation happens on this tick.
    pub selection_tick: bool,
}

impl<'a, 'b> Lifecycle<'a, 'b> {
    fn happiness(&self, car: VehicleId, toward: VehicleId) -> f64 {
        self.reward
            .reported(self.topology.registry, car, toward)
            .unwrap_or(0.0)
    }

    /// Run the handler for `car`'s current state.
    pub fn step(&mut self, car: VehicleId, neighbors: &[VehicleId], decision: Option<VehicleId>) {
        let Some(state) = self.topology.state(car) else {
            return;
        };
        match state {
            LifecycleState::NewSpawned => self.on_new_spawned(car),
            LifecycleState::SingleCar => self.on_single_car(car, neighbors, decision),
            LifecycleState::PrepareJoining => self.on_prepare_joining(car, neighbors),
            LifecycleState::JoiningProcess => self.on_joining(car, neighbors),
            LifecycleState::Platoon => self.on_platoon(car, neighbors, decision),
            LifecycleState::Merging => self.on_merging(car, neighbors),
            LifecycleState::LeavingProcess => self.topology.prepare_for_remove(car),
            LifecycleState::Left => self.on_left(car),
            LifecycleState::NoPlatooning => self.on_no_platooning(car),
        }
    }

    fn on_new_spawned(&mut self, car: VehicleId) {
        self.topology.fix_speed_factor(car);
        let on_highway = self
            .topology
            .registry
            .get(car)
            .is_some_and(|v| self.topology.config.is_highway(&v.telemetry.road));
        if on_highway {
            self.topology.set_state(car, LifecycleState::SingleCar);
        }
    }

    fn on_single_car(&mut self, car: VehicleId, neighbors: &[VehicleId], decision: Option<VehicleId>) {
        let topology = &mut *self.topology;
        topology.fix_speed_factor(car);

        if topology.take_next_exit(car) {
            topology.set_state(car, LifecycleState::NoPlatooning);
            return;
        }
        let Some(target) = decision.filter(|_| self.selection_tick) else {
            return;
        };
        if topology.cars_in_between(car, target, neighbors) {
            return;
        }
        let Some(other) = topology.registry.get(target) else {
            return;
        };
        let members = other.platoon_members();
        if members.len() >= topology.config.max_platoon_size {
            return;
        }
        let last = members.last().copied().unwrap_or(target);
        let (Some(own_lane), Some(target_lane)) = (topology.registry.lane(car), topology.registry.lane(target)) else {
            return;
        };
        let lane_difference = own_lane.abs_diff(target_lane) as f64;
        let clearance = (lane_difference + 1.0) * topology.config.joining.minimal_distance;

        if topology.registry.distance(car, last).is_some_and(|d| d > clearance) {
            topology.set_state(car, LifecycleState::PrepareJoining);
            if let Some(v) = topology.registry.get_mut(car) {
                v.desired_leader = Some(target);
            }
            if let Some(t) = topology.registry.get_mut(target) {
                t.has_joiner = true;
            }
            debug!("[Lifecycle] {} prepares to join {}", car, target);
        }
    }

    fn on_prepare_joining(&mut self, car: VehicleId, neighbors: &[VehicleId]) {
        let switching = self
            .topology
            .registry
            .get(car)
            .and_then(|v| v.switch_baseline)
            .is_some();
        let target = self.topology.registry.get(car).and_then(|v| v.desired_leader);

        // happiness of the target platoon before the joiner arrives
        let mut before = BTreeMap::new();
        if let (true, Some(t)) = (switching, target) {
            let members = self
                .topology
                .registry
                .get(t)
                .map(|v| v.platoon_members().to_vec())
                .unwrap_or_default();
            for member in members {
                before.insert(member, self.happiness(member, t));
            }
        }

        let progress = self.topology.prepare_joining(car, neighbors);
        if progress == JoinProgress::Approaching || !switching {
            return;
        }

        if progress == JoinProgress::Aborted {
            self.counters.change_aborts += 1;
        }
        let Some(vehicle) = self.topology.registry.get(car) else {
            return;
        };
        let leader = vehicle.platoon_leader();
        let baseline = vehicle.switch_baseline.unwrap_or(0.0);
        let gain = self.happiness(car, leader) - baseline;
        self.changes.push(HappinessChange {
            tick: self.tick,
            vehicle: car,
            scope: ChangeScope::Vehicle,
            gain,
        });

        if progress == JoinProgress::Joined {
            let members = self
                .topology
                .registry
                .get(leader)
                .map(|l| l.platoon_members().to_vec())
                .unwrap_or_default();
            let platoon_gain: f64 = members
                .iter()
                .filter_map(|m| before.get(m).map(|old| self.happiness(*m, leader) - old))
                .sum();
            self.changes.push(HappinessChange {
                tick: self.tick,
                vehicle: leader,
                scope: ChangeScope::Platoon,
                gain: platoon_gain,
            });
        }
        if let Some(v) = self.topology.registry.get_mut(car) {
            v.switch_baseline = None;
        }
    }

    fn on_joining(&mut self, car: VehicleId, neighbors: &[VehicleId]) {
        self.topology.joining_process(car);
        let Some(leader) = self.topology.registry.get(car).and_then(|v| v.leader) else {
            return;
        };
        if self.topology.take_next_exit(car) || self.topology.cars_in_between(car, leader, neighbors) {
            self.topology.set_state(car, LifecycleState::LeavingProcess);
        }
    }

    fn on_platoon(&mut self, car: VehicleId, neighbors: &[VehicleId], decision: Option<VehicleId>) {
        let merging_enabled = self.topology.config.decision.merging_enabled;
        if self.selection_tick && merging_enabled && self.learning && self.topology.check_merging(car, decision, neighbors) {
            self.counters.merges += 1;
        }

        let Some(vehicle) = self.topology.registry.get(car) else {
            return;
        };
        if vehicle.is_leader {
            self.topology.handle_auto_lane_change(car);
        } else if let Some(leader) = vehicle.leader {
            let wrong_lane = self.topology.state(leader) == Some(LifecycleState::Platoon)
                && !self.topology.registry.on_same_lane_with_leader(car)
                && self.topology.registry.same_road(car, leader);
            if wrong_lane {
                self.topology.check_emergency_quit(car, leader);
            }
        }

        if self.topology.state(car) != Some(LifecycleState::Platoon) || !self.selection_tick {
            return;
        }
        if self.topology.take_next_exit(car) {
            debug!("[Lifecycle] {} approaches its exit", car);
            self.topology.set_state(car, LifecycleState::LeavingProcess);
            return;
        }
        let has_joiner = self.topology.registry.get(car).is_some_and(|v| v.has_joiner);
        if self.learning && !has_joiner && self.topology.handle_platoon_changing(car, decision, neighbors) {
            let leader = self
                .topology
                .registry
                .get(car)
                .map_or(car, |v| v.platoon_leader());
            let baseline = self.happiness(car, leader);
            if let Some(v) = self.topology.registry.get_mut(car) {
                v.switch_baseline = Some(baseline);
            }
            self.counters.changes += 1;
            info!("🔀 [Lifecycle] {} leaves {} for a better platoon", car, leader);
        }
    }

    fn on_merging(&mut self, car: VehicleId, neighbors: &[VehicleId]) {
        let Some(vehicle) = self.topology.registry.get(car) else {
            return;
        };
        if !vehicle.is_leader {
            // the merge is driven by the leader; fall back if it stopped merging
            if let Some(leader) = vehicle.leader {
                if self.topology.state(leader) != Some(LifecycleState::Merging) {
                    self.topology.set_state(car, LifecycleState::Platoon);
                }
            }
            return;
        }

        let members = vehicle.members.clone();
        let front = vehicle.desired_leader;
        let in_range = front
            .and_then(|f| self.topology.registry.distance(car, f))
            .is_some_and(|d| d <= self.topology.config.detection_radius);

        let aborted = match front {
            Some(front) if in_range => {
                let tail = members.last().copied().unwrap_or(car);
                if self.topology.cars_in_between(tail, front, neighbors) {
                    false
                } else {
                    self.topology.merge_platoons(car) == MergeOutcome::Aborted
                }
            }
            _ => true,
        };

        if aborted {
            self.counters.merge_aborts += 1;
            if let Some(v) = self.topology.registry.get_mut(car) {
                v.desired_leader = None;
            }
            for member in members {
                self.topology.set_state(member, LifecycleState::Platoon);
            }
            debug!("[Lifecycle] merge of {} aborted", car);
        }
    }

    fn on_left(&mut self, car: VehicleId) {
        self.topology.remove_member(car);
        let dropped_switch = self
            .topology
            .registry
            .get(car)
            .is_some_and(|v| v.state == LifecycleState::NoPlatooning && v.switch_baseline.is_some());
        if dropped_switch {
            self.counters.change_aborts += 1;
            if let Some(v) = self.topology.registry.get_mut(car) {
                v.switch_baseline = None;
            }
        }
    }

    fn on_no_platooning(&mut self, car: VehicleId) {
        let exit = self.topology.take_next_exit(car);
        let off_right_lane = self.topology.registry.lane(car).is_some_and(|l| l != 0);
        if exit && off_right_lane {
            self.topology.set_speed_factor(car, 0.5);
        } else {
            self.topology.fix_speed_factor(car);
        }
        if exit {
            return;
        }

        let dwell_limit = self.topology.config.decision.no_platooning_dwell;
        let Some(v) = self.topology.registry.get_mut(car) else {
            return;
        };
        if v.dwell >= dwell_limit {
            v.dwell = 0;
            self.topology.set_state(car, LifecycleState::SingleCar);
        } else {
            v.dwell += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::topology::fixtures::*;
    use super::*;
    use crate::core::config::PlatoonConfig;
    use crate::core::world::Outbox;

    struct Harness {
        config: PlatoonConfig,
        reward: RewardModel,
        counters: Counters,
        changes: Vec<HappinessChange>,
        outbox: Outbox,
    }

    impl Harness {
        fn new() -> Self {
            let config = PlatoonConfig::default();
            Harness {
                reward: RewardModel::new(&config),
                config,
                counters: Counters::default(),
                changes: Vec::new(),
                outbox: Outbox::default(),
            }
        }

        fn step(
            &mut self,
            registry: &mut crate::core::registry::VehicleRegistry,
            car: u32,
            neighbors: &[VehicleId],
            decision: Option<u32>,
        ) {
            let mut topology = Topology::new(registry, &mut self.outbox, &self.config);
            let mut lifecycle = Lifecycle {
                topology: &mut topology,
                reward: &self.reward,
                learning: true,
                counters: &mut self.counters,
                changes: &mut self.changes,
                tick: 0,
                selection_tick: true,
            };
            lifecycle.step(VehicleId(car), neighbors, decision.map(VehicleId));
        }
    }

    #[test]
    fn single_car_prepares_to_join_a_small_platoon() {
        let mut h = Harness::new();
        let mut registry = registry(&[(1, 0.0, 0), (2, 100.0, 0), (3, 90.0, 0)]);
        {
            let mut topology = Topology::new(&mut registry, &mut h.outbox, &h.config);
            form(&mut topology, &[2, 3]);
        }
        let neighbors = [VehicleId(2), VehicleId(3)];
        h.step(&mut registry, 1, &neighbors, Some(2));

        let car = registry.get(VehicleId(1)).unwrap();
        assert_eq!(car.state, LifecycleState::PrepareJoining);
        assert_eq!(car.desired_leader, Some(VehicleId(2)));
        assert!(registry.get(VehicleId(2)).unwrap().has_joiner);
    }

    #[test]
    fn clearance_to_tail_scales_with_lane_difference() {
        let mut h = Harness::new();
        let mut registry = registry(&[(1, 80.0, 1), (2, 120.0, 0), (3, 110.0, 0)]);
        {
            let mut topology = Topology::new(&mut registry, &mut h.outbox, &h.config);
            form(&mut topology, &[2, 3]);
        }
        // one lane over: 26 m to the tail against 24 m required
        h.step(&mut registry, 1, &[VehicleId(2), VehicleId(3)], Some(2));
        assert_eq!(registry.get(VehicleId(1)).unwrap().state, LifecycleState::PrepareJoining);

        registry.get_mut(VehicleId(1)).unwrap().state = LifecycleState::SingleCar;
        // 21 m is too close
        registry.get_mut(VehicleId(1)).unwrap().telemetry.x = 85.0;
        h.step(&mut registry, 1, &[VehicleId(2), VehicleId(3)], Some(2));
        assert_eq!(registry.get(VehicleId(1)).unwrap().state, LifecycleState::SingleCar);
    }

    #[test]
    fn new_vehicle_waits_for_highway() {
        let mut h = Harness::new();
        let mut registry = registry(&[(1, 0.0, 0)]);
        {
            let v = registry.get_mut(VehicleId(1)).unwrap();
            v.state = LifecycleState::NewSpawned;
            v.telemetry.road = "ramp".to_string();
        }
        h.step(&mut registry, 1, &[], None);
        assert_eq!(registry.get(VehicleId(1)).unwrap().state, LifecycleState::NewSpawned);
        registry.get_mut(VehicleId(1)).unwrap().telemetry.road = "E6".to_string();
        h.step(&mut registry, 1, &[], None);
        assert_eq!(registry.get(VehicleId(1)).unwrap().state, LifecycleState::SingleCar);
    }

    #[test]
    fn no_platooning_dwells_before_returning() {
        let mut h = Harness::new();
        let mut registry = registry(&[(1, 0.0, 0)]);
        registry.get_mut(VehicleId(1)).unwrap().state = LifecycleState::NoPlatooning;
        for _ in 0..20 {
            h.step(&mut registry, 1, &[], None);
            assert_eq!(registry.get(VehicleId(1)).unwrap().state, LifecycleState::NoPlatooning);
        }
        h.step(&mut registry, 1, &[], None);
        assert_eq!(registry.get(VehicleId(1)).unwrap().state, LifecycleState::SingleCar);
    }

    #[test]
    fn exit_bound_vehicle_slows_down_off_the_right_lane() {
        let mut h = Harness::new();
        let mut registry = registry(&[(1, 0.0, 2)]);
        {
            let v = registry.get_mut(VehicleId(1)).unwrap();
            v.state = LifecycleState::NoPlatooning;
            v.telemetry.distance_to_end = 600.0;
        }
        h.step(&mut registry, 1, &[], None);
        let v = registry.get(VehicleId(1)).unwrap();
        assert_eq!(v.telemetry.speed_factor, 0.5);
        assert_eq!(v.dwell, 0);
    }

    #[test]
    fn merge_out_of_range_is_aborted() {
        let mut h = Harness::new();
        let mut registry = registry(&[(1, 400.0, 0), (2, 390.0, 0), (3, 100.0, 0), (4, 90.0, 0)]);
        {
            let mut topology = Topology::new(&mut registry, &mut h.outbox, &h.config);
            form(&mut topology, &[1, 2]);
            form(&mut topology, &[3, 4]);
            topology.set_state(VehicleId(3), LifecycleState::Merging);
            topology.set_state(VehicleId(4), LifecycleState::Merging);
            topology.registry.get_mut(VehicleId(3)).unwrap().desired_leader = Some(VehicleId(1));
        }
        h.step(&mut registry, 3, &[], None);
        assert_eq!(h.counters.merge_aborts, 1);
        assert_eq!(registry.get(VehicleId(4)).unwrap().state, LifecycleState::Platoon);
        assert!(registry.get(VehicleId(3)).unwrap().desired_leader.is_none());
    }

    #[test]
    fn better_platoon_triggers_leave_with_baseline() {
        let mut h = Harness::new();
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0), (3, 80.0, 0), (5, 180.0, 0)]);
        {
            let mut topology = Topology::new(&mut registry, &mut h.outbox, &h.config);
            form(&mut topology, &[1, 2, 3]);
        }
        registry.get_mut(VehicleId(5)).unwrap().state = LifecycleState::SingleCar;
        h.step(&mut registry, 3, &[VehicleId(1), VehicleId(2), VehicleId(5)], Some(5));

        let car = registry.get(VehicleId(3)).unwrap();
        assert_eq!(car.state, LifecycleState::LeavingProcess);
        assert_eq!(car.desired_leader, Some(VehicleId(5)));
        assert!(car.switch_baseline.is_some());
        assert_eq!(h.counters.changes, 1);
    }
}
