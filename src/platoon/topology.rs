//! Topology operations.
//!
//! Every operation leaves the leader and all members it touches mutually
//! consistent before returning. Cross-vehicle links are ids resolved through
//! the registry; a vanished id makes the operation a no-op for that vehicle.

use crate::core::config::PlatoonConfig;
use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::{LifecycleState, VehicleId};
use crate::core::world::{Actuation, ControllerMode, Outbox};
use tracing::{debug, info};

/// Window behind the vehicle still scanned for blockers.
const BLOCKER_LOOKBEHIND: f64 = -10.0;

/// Result of one merge attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Back platoon is changing onto the front platoon's lane.
    Steering,
    /// Lane change needed but the side is occupied.
    Blocked,
    Merged,
    /// Front platoon vanished, changed road or can no longer take everyone.
    Aborted,
}

/// Mutable view over the vehicle table plus the command queue for one tick.
pub struct Topology<'a> {
    pub registry: &'a mut VehicleRegistry,
    pub outbox: &'a mut Outbox,
    pub config: &'a PlatoonConfig,
}

impl<'a> Topology<'a> {
    pub fn new(registry: &'a mut VehicleRegistry, outbox: &'a mut Outbox, config: &'a PlatoonConfig) -> Self {
        Topology {
            registry,
            outbox,
            config,
        }
    }

    pub fn state(&self, id: VehicleId) -> Option<LifecycleState> {
        self.registry.get(id).map(|v| v.state)
    }

    pub fn set_state(&mut self, id: VehicleId, state: LifecycleState) {
        if let Some(v) = self.registry.get_mut(id) {
            if v.state != state {
                debug!("[Lifecycle] {} {:?} -> {:?}", id, v.state, state);
                v.state = state;
            }
        }
    }

    pub fn set_lane(&mut self, id: VehicleId, lane: u8, cautious: bool) {
        self.outbox.push(id, Actuation::SetLane { lane, cautious });
    }

    pub fn left_of(&self, lane: u8) -> u8 {
        lane.saturating_add(1).min(self.config.lane_count.saturating_sub(1))
    }

    pub fn right_of(&self, lane: u8) -> u8 {
        lane.saturating_sub(1)
    }

    pub fn set_speed_factor(&mut self, id: VehicleId, factor: f64) {
        if let Some(v) = self.registry.get_mut(id) {
            v.telemetry.speed_factor = factor;
            self.outbox.push(id, Actuation::SpeedFactor(factor));
        }
    }

    /// Restore the spawn-time speed factor if something else is applied.
    pub fn fix_speed_factor(&mut self, id: VehicleId) {
        let Some(v) = self.registry.get(id) else {
            return;
        };
        if v.telemetry.speed_factor != v.desired_speed_factor {
            let factor = v.desired_speed_factor;
            self.set_speed_factor(id, factor);
        }
    }

    /// Drop all platoon data and hand the vehicle back to its driver model.
    pub fn reset_to_single(&mut self, id: VehicleId) {
        let Some(v) = self.registry.get_mut(id) else {
            return;
        };
        v.clear_platoon();
        self.outbox.push(id, Actuation::Unfollow);
        self.outbox.push(id, Actuation::AutoLaneChange(false));
        self.outbox.push(id, Actuation::Controller(ControllerMode::Driver));
        self.outbox.push(id, Actuation::ReleaseLane);
    }

    fn cruise(&mut self, id: VehicleId, speed: f64) {
        self.outbox.push(
            id,
            Actuation::CruiseParams {
                target_gap: self.config.joining.inter_vehicle_gap,
                desired_speed: speed,
                headway: self.config.joining.headway_time,
            },
        );
    }

    /// Make `leader` the head of a fresh one-vehicle platoon.
    pub fn init_leader(&mut self, leader: VehicleId) {
        self.reset_to_single(leader);
        let Some(v) = self.registry.get_mut(leader) else {
            return;
        };
        let speed = v.desired_speed();
        let lane = v.telemetry.lane;
        v.leader = Some(leader);
        v.is_leader = true;
        v.members = vec![leader];
        v.desired_platoon_speed = Some(speed);
        v.state = LifecycleState::Platoon;

        self.cruise(leader, speed);
        self.outbox.push(leader, Actuation::Controller(ControllerMode::Acc));
        self.set_lane(leader, lane, false);
        self.outbox.push(leader, Actuation::AutoLaneChange(true));
    }

    /// Append `car` to the tail of `leader`'s platoon and re-average the platoon speed.
    pub fn add_member(&mut self, car: VehicleId, leader: VehicleId) -> bool {
        if car == leader || !self.registry.contains(car) {
            return false;
        }
        if !self.registry.get(leader).is_some_and(|l| l.is_leader) {
            return false;
        }
        self.reset_to_single(car);

        let Some(l) = self.registry.get(leader) else {
            return false;
        };
        let size = l.members.len();
        let front = l.members.last().copied().unwrap_or(leader);
        let lane = l.telemetry.lane;
        let platoon_speed = l.desired_platoon_speed();
        let car_speed = self.registry.get(car).map_or(platoon_speed, |v| v.desired_speed());
        let speed = (platoon_speed * size as f64 + car_speed) / (size + 1) as f64;

        if let Some(v) = self.registry.get_mut(car) {
            v.leader = Some(leader);
        }
        self.cruise(car, speed);
        self.set_lane(car, lane, false);
        self.outbox.push(car, Actuation::Controller(ControllerMode::Cacc));
        self.outbox.push(car, Actuation::Follow { leader, front });

        let members = match self.registry.get_mut(leader) {
            Some(l) => {
                l.members.push(car);
                l.members.clone()
            }
            None => return false,
        };
        self.outbox.push(leader, Actuation::RegisterMember { member: car, position: size });
        self.outbox.push(leader, Actuation::DesiredSpeed(speed));
        for member in members {
            if let Some(m) = self.registry.get_mut(member) {
                m.desired_platoon_speed = Some(speed);
            }
        }
        true
    }

    /// Rebuild a platoon from an ordered member list. The head is initialised as
    /// leader, everyone else keeps their lifecycle state.
    fn rebuild(&mut self, members: &[VehicleId]) {
        let Some((&head, rest)) = members.split_first() else {
            return;
        };
        self.init_leader(head);
        for &member in rest {
            let Some(state) = self.state(member) else {
                continue;
            };
            self.add_member(member, head);
            self.set_state(member, state);
        }
    }

    /// The leave operation: unwind `car` from its platoon.
    ///
    /// Platoons of two dissolve. Larger ones are rebuilt in order under the old
    /// leader, or the second vehicle if the leader itself left. The leaver heads
    /// for its pending desired leader if it still exists.
    pub fn remove_member(&mut self, car: VehicleId) {
        let Some(vehicle) = self.registry.get(car) else {
            return;
        };
        let leader = vehicle.platoon_leader();
        let members = match self.registry.get_mut(leader) {
            Some(l) => {
                l.has_leaver = false;
                l.platoon_members().to_vec()
            }
            None => vec![car],
        };

        if members.len() <= 2 && members.contains(&car) {
            for &member in &members {
                self.reset_to_single(member);
                self.set_state(member, LifecycleState::NoPlatooning);
            }
            if members.len() > 1 {
                info!("💨 [Topology] Platoon of {} dissolved", leader);
            }
        } else {
            let head = if leader == car { members[1] } else { leader };
            let mut order = vec![head];
            order.extend(members.iter().copied().filter(|m| *m != car && *m != head));
            self.rebuild(&order);
            self.reset_to_single(car);
            self.set_state(car, LifecycleState::NoPlatooning);
            debug!("[Topology] {} left, {} now leads {} vehicles", car, head, order.len());
        }

        let desired = self
            .registry
            .get(car)
            .and_then(|v| v.desired_leader)
            .filter(|d| self.registry.contains(*d));
        match desired {
            Some(_) => self.set_state(car, LifecycleState::PrepareJoining),
            None => {
                if let Some(v) = self.registry.get_mut(car) {
                    v.desired_leader = None;
                }
            }
        }
    }

    /// First member still in `Platoon` state if the leader is not.
    pub fn successor(&self, leader: VehicleId, members: &[VehicleId]) -> VehicleId {
        if self.state(leader) == Some(LifecycleState::Platoon) {
            return leader;
        }
        members
            .iter()
            .copied()
            .find(|m| self.state(*m) == Some(LifecycleState::Platoon))
            .unwrap_or(leader)
    }

    /// Steer members that still travel with the platoon onto `lane`.
    pub fn set_platoon_lane(&mut self, members: &[VehicleId], lane: u8) {
        for &member in members {
            if matches!(
                self.state(member),
                Some(LifecycleState::Platoon | LifecycleState::JoiningProcess | LifecycleState::PrepareJoining)
            ) {
                self.set_lane(member, lane, false);
            }
        }
    }

    pub fn left_lane_blocked(&self, members: &[VehicleId]) -> bool {
        members
            .iter()
            .any(|m| self.registry.get(*m).is_some_and(|v| v.telemetry.left_blocked))
    }

    /// Whether anyone outside both platoons sits between `car` and the tail of `front`'s platoon.
    pub fn cars_in_between(&self, car: VehicleId, front: VehicleId, neighbors: &[VehicleId]) -> bool {
        let (Some(vehicle), Some(target)) = (self.registry.get(car), self.registry.get(front)) else {
            return true;
        };
        let Some(to_front) = self.registry.distance(car, front) else {
            return true;
        };
        let platoon_length = target.platoon_members().len().max(1) as f64 * self.config.slot_length();
        let own_leader = vehicle.platoon_leader();
        let (car_lane, front_lane) = (vehicle.telemetry.lane, target.telemetry.lane);

        neighbors.iter().any(|&n| {
            let Some(other) = self.registry.get(n) else {
                return false;
            };
            let Some(d) = self.registry.distance(car, n) else {
                return false;
            };
            if !(BLOCKER_LOOKBEHIND < d && d < to_front - platoon_length) {
                return false;
            }
            let other_leader = other.platoon_leader();
            if other_leader == front || other_leader == own_leader {
                return false;
            }
            let lane = other.telemetry.lane;
            lane == front_lane
                || (front_lane >= lane && lane > car_lane)
                || (front_lane <= lane && lane < car_lane)
        })
    }

    /// Route end is within the exit lead distance, measured from the vehicle's queue slot.
    pub fn take_next_exit(&self, car: VehicleId) -> bool {
        let Some(v) = self.registry.get(car) else {
            return false;
        };
        let offset = if v.is_in_platoon() {
            self.registry.position_in_platoon(car).unwrap_or(0) as f64 * self.config.slot_length()
        } else {
            0.0
        };
        v.telemetry.distance_to_end - offset < self.config.joining.exit_lead_distance
    }

    /// Move toward `target`'s lane if nothing is in between, otherwise hold the current lane.
    pub fn lane_change(&mut self, car: VehicleId, target: VehicleId, neighbors: &[VehicleId], cautious: bool) {
        let (Some(own_lane), Some(target_lane)) = (self.registry.lane(car), self.registry.lane(target)) else {
            return;
        };
        if !self.registry.on_same_lane_with_leader(car)
            && self.registry.same_road(car, target)
            && !self.cars_in_between(car, target, neighbors)
        {
            self.set_lane(car, target_lane, cautious);
        } else {
            self.set_lane(car, own_lane, cautious);
        }
    }

    /// Bubble `car` forward past every predecessor it has overtaken by more
    /// than a vehicle length, then rebuild the platoon under its new head.
    pub fn fix_order(&mut self, car: VehicleId) -> bool {
        let Some(leader) = self.registry.get(car).and_then(|v| v.leader) else {
            return false;
        };
        let Some(mut members) = self.registry.get(leader).map(|l| l.members.clone()) else {
            return false;
        };
        let Some(mut pos) = members.iter().position(|m| *m == car) else {
            return false;
        };

        let overtaken = -self.config.joining.vehicle_length;
        let mut switched = false;
        while pos > 0 {
            let predecessor = members[pos - 1];
            match self.registry.distance(car, predecessor) {
                Some(d) if d <= overtaken => {
                    members.swap(pos, pos - 1);
                    pos -= 1;
                    switched = true;
                }
                _ => break,
            }
        }

        if switched {
            debug!("[Topology] Reordered platoon: {:?}", members);
            self.rebuild(&members);
        }
        switched
    }

    /// Fold the platoon led by `back` into the one led by its desired leader.
    pub fn merge_platoons(&mut self, back: VehicleId) -> MergeOutcome {
        let Some(back_leader) = self.registry.get(back).filter(|v| v.is_leader) else {
            return MergeOutcome::Aborted;
        };
        let Some(front) = back_leader.desired_leader else {
            return MergeOutcome::Aborted;
        };
        let Some(front_leader) = self.registry.get(front).filter(|v| v.is_leader) else {
            return MergeOutcome::Aborted;
        };
        if back_leader.telemetry.road != front_leader.telemetry.road {
            return MergeOutcome::Aborted;
        }

        let back_members = back_leader.members.clone();
        let (back_lane, front_lane) = (back_leader.telemetry.lane, front_leader.telemetry.lane);

        if back_lane != front_lane {
            let blocked = if back_lane > front_lane {
                back_leader.telemetry.right_blocked
            } else {
                back_leader.telemetry.left_blocked
            };
            if blocked {
                return MergeOutcome::Blocked;
            }
            for &member in &back_members {
                self.set_lane(member, front_lane, false);
            }
            return MergeOutcome::Steering;
        }

        if front_leader.members.len() + back_members.len() > self.config.max_platoon_size {
            return MergeOutcome::Aborted;
        }

        if let Some(v) = self.registry.get_mut(back) {
            v.desired_leader = None;
        }
        for &member in &back_members {
            self.add_member(member, front);
            self.set_state(member, LifecycleState::Platoon);
        }
        for &member in &back_members {
            self.fix_order(member);
        }
        info!("🔗 [Topology] Platoon of {} merged into {}", back, front);
        MergeOutcome::Merged
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn add_member_averages_speed_and_wires_followers() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 100.0, 0), (2, 80.0, 0)]);
        registry.get_mut(VehicleId(2)).unwrap().desired_speed_factor = 0.5;
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);

        topology.init_leader(VehicleId(1));
        assert!(topology.add_member(VehicleId(2), VehicleId(1)));

        // (30·1 + 20) / 2
        for id in [1, 2] {
            assert_eq!(registry.get(VehicleId(id)).unwrap().desired_platoon_speed, Some(25.0));
        }
        assert!(outbox.commands().contains(&(
            VehicleId(2),
            Actuation::Follow {
                leader: VehicleId(1),
                front: VehicleId(1)
            }
        )));
        assert!(outbox
            .commands()
            .contains(&(VehicleId(1), Actuation::RegisterMember { member: VehicleId(2), position: 1 })));
        registry.check_consistency(config.max_platoon_size).unwrap();
    }

    #[test]
    fn join_then_leave_restores_member_order() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0), (3, 80.0, 0), (4, 70.0, 0)]);
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        form(&mut topology, &[1, 2, 3]);
        let before = members(topology.registry, 1);

        assert!(topology.add_member(VehicleId(4), VehicleId(1)));
        topology.remove_member(VehicleId(4));

        assert_eq!(members(&registry, 1), before);
        assert_eq!(registry.get(VehicleId(4)).unwrap().state, LifecycleState::NoPlatooning);
        assert!(!registry.get(VehicleId(4)).unwrap().is_in_platoon());
        registry.check_consistency(config.max_platoon_size).unwrap();
    }

    #[test]
    fn leader_leaving_hands_over_to_second_vehicle() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0), (3, 80.0, 0)]);
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        form(&mut topology, &[1, 2, 3]);
        topology.set_state(VehicleId(3), LifecycleState::LeavingProcess);
        topology.remove_member(VehicleId(1));

        assert_eq!(members(&registry, 2), vec![2, 3]);
        // state survives the rebuild
        assert_eq!(registry.get(VehicleId(3)).unwrap().state, LifecycleState::LeavingProcess);
        registry.check_consistency(config.max_platoon_size).unwrap();
    }

    #[test]
    fn pair_dissolves_and_leaver_heads_for_new_partner() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0), (5, 200.0, 1)]);
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        form(&mut topology, &[1, 2]);
        topology.registry.get_mut(VehicleId(2)).unwrap().desired_leader = Some(VehicleId(5));
        topology.remove_member(VehicleId(2));

        assert_eq!(registry.get(VehicleId(1)).unwrap().state, LifecycleState::NoPlatooning);
        assert_eq!(registry.get(VehicleId(2)).unwrap().state, LifecycleState::PrepareJoining);
        assert!(!registry.get(VehicleId(1)).unwrap().is_leader);
        registry.check_consistency(config.max_platoon_size).unwrap();
    }

    #[test]
    fn overtaking_joiner_is_moved_forward() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0), (3, 95.0, 0)]);
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        form(&mut topology, &[1, 2]);
        assert!(topology.add_member(VehicleId(3), VehicleId(1)));
        // 3 at x=95 is 5 m ahead of 2 at x=90: distance 3→2 = -(5-4) = -1, not enough
        assert!(!topology.fix_order(VehicleId(3)));
        topology.registry.get_mut(VehicleId(3)).unwrap().telemetry.x = 99.0;
        assert!(topology.fix_order(VehicleId(3)));

        assert_eq!(members(&registry, 1), vec![1, 3, 2]);
        registry.check_consistency(config.max_platoon_size).unwrap();
    }

    #[test]
    fn blockers_between_car_and_platoon() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 0.0, 0), (2, 100.0, 0), (3, 40.0, 0), (4, 40.0, 2)]);
        let mut outbox = Outbox::default();
        let topology = Topology::new(&mut registry, &mut outbox, &config);
        let neighbors = [VehicleId(2), VehicleId(3), VehicleId(4)];

        assert!(topology.cars_in_between(VehicleId(1), VehicleId(2), &neighbors));
        assert!(!topology.cars_in_between(VehicleId(1), VehicleId(2), &[VehicleId(4)]));
        assert!(topology.cars_in_between(VehicleId(1), VehicleId(42), &neighbors));
    }

    #[test]
    fn merge_waits_for_lane_then_folds_back_platoon() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 200.0, 1), (2, 190.0, 1), (3, 120.0, 0), (4, 110.0, 0)]);
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        form(&mut topology, &[1, 2]);
        form(&mut topology, &[3, 4]);
        topology.registry.get_mut(VehicleId(3)).unwrap().desired_leader = Some(VehicleId(1));

        topology.registry.get_mut(VehicleId(3)).unwrap().telemetry.left_blocked = true;
        assert_eq!(topology.merge_platoons(VehicleId(3)), MergeOutcome::Blocked);
        topology.registry.get_mut(VehicleId(3)).unwrap().telemetry.left_blocked = false;
        assert_eq!(topology.merge_platoons(VehicleId(3)), MergeOutcome::Steering);

        for id in [3, 4] {
            topology.registry.get_mut(VehicleId(id)).unwrap().telemetry.lane = 1;
        }
        assert_eq!(topology.merge_platoons(VehicleId(3)), MergeOutcome::Merged);
        assert_eq!(members(&registry, 1), vec![1, 2, 3, 4]);
        assert!(registry.get(VehicleId(3)).unwrap().desired_leader.is_none());
        registry.check_consistency(config.max_platoon_size).unwrap();
    }

    #[test]
    fn exit_distance_accounts_for_queue_slot() {
        let config = PlatoonConfig::default();
        let mut registry = registry(&[(1, 100.0, 0), (2, 90.0, 0)]);
        registry.get_mut(VehicleId(2)).unwrap().telemetry.distance_to_end = 1205.0;
        let mut outbox = Outbox::default();
        let mut topology = Topology::new(&mut registry, &mut outbox, &config);
        assert!(!topology.take_next_exit(VehicleId(2)));
        form(&mut topology, &[1, 2]);
        // 1205 - 1·9 < 1200
        assert!(topology.take_next_exit(VehicleId(2)));
    }
}
