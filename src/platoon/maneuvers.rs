//! Multi-tick maneuvers built from the topology operations: joining,
//! leave preparation, merge checks and in-platoon lane discipline.

use super::topology::Topology;
use crate::core::vehicle::{LifecycleState, VehicleId};
use crate::core::world::Actuation;
use tracing::{debug, warn};

/// Speed-up applied to a joiner chasing a faster target.
const CATCH_UP_FACTOR: f64 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinProgress {
    /// Still converging on the target.
    Approaching,
    Joined,
    /// Target gone, out of reach or full.
    Aborted,
}

impl<'a> Topology<'a> {
    fn abort_join(&mut self, car: VehicleId, target: Option<VehicleId>) -> JoinProgress {
        if let Some(t) = target.and_then(|t| self.registry.get_mut(t)) {
            t.has_joiner = false;
        }
        self.reset_to_single(car);
        if let Some(v) = self.registry.get_mut(car) {
            v.desired_leader = None;
        }
        self.set_state(car, LifecycleState::NoPlatooning);
        JoinProgress::Aborted
    }

    /// One tick of `PrepareJoining`: converge on the desired leader's lane and
    /// speed, and join once on the same lane with nothing in between.
    pub fn prepare_joining(&mut self, car: VehicleId, neighbors: &[VehicleId]) -> JoinProgress {
        let Some(mut target) = self
            .registry
            .get(car)
            .and_then(|v| v.desired_leader)
            .filter(|t| self.registry.contains(*t))
        else {
            warn!("⚠️ [Join] {} lost its target", car);
            return self.abort_join(car, None);
        };

        // the target may have joined someone else meanwhile
        if let Some(head) = self.registry.get(target).and_then(|t| t.leader) {
            if head != target {
                let Some(head) = self.registry.resolve_leader(head) else {
                    return self.abort_join(car, Some(target));
                };
                debug!("[Join] {} retargets {} -> {}", car, target, head);
                target = head;
                if let Some(v) = self.registry.get_mut(car) {
                    v.desired_leader = Some(target);
                }
                if let Some(t) = self.registry.get_mut(target) {
                    t.has_joiner = true;
                }
            }
        }

        self.lane_change(car, target, neighbors, true);

        let (Some(own), Some(other)) = (self.registry.get(car), self.registry.get(target)) else {
            return self.abort_join(car, Some(target));
        };
        if other.telemetry.speed_factor > own.telemetry.speed_factor {
            let factor = other.telemetry.speed_factor * CATCH_UP_FACTOR;
            self.set_speed_factor(car, factor);
        }

        let (Some(own), Some(other)) = (self.registry.get(car), self.registry.get(target)) else {
            return self.abort_join(car, Some(target));
        };
        let reachable = other.state.is_addressable()
            && self
                .registry
                .distance(car, target)
                .is_some_and(|d| d > 0.0 && d < self.config.detection_radius)
            && own.telemetry.speed > self.config.joining.min_joining_speed;
        if !reachable {
            debug!("[Join] {} gives up on {}", car, target);
            return self.abort_join(car, Some(target));
        }
        if other.platoon_members().len() >= self.config.max_platoon_size {
            debug!("[Join] {} found {} full", car, target);
            return self.abort_join(car, Some(target));
        }

        if !self.registry.on_same_lane_with_leader(car) || self.cars_in_between(car, target, neighbors) {
            return JoinProgress::Approaching;
        }

        if !other.is_leader {
            self.init_leader(target);
        }
        if !self.add_member(car, target) {
            return self.abort_join(car, Some(target));
        }
        if let Some(t) = self.registry.get_mut(target) {
            t.has_joiner = true;
        }
        self.fix_order(car);
        self.set_state(car, LifecycleState::JoiningProcess);
        if let Some(v) = self.registry.get_mut(car) {
            v.desired_leader = None;
            v.dwell = 0;
        }
        debug!("[Join] {} attached to {}", car, target);
        JoinProgress::Joined
    }

    /// One tick of `JoiningProcess`: close up to the predecessor.
    pub fn joining_process(&mut self, car: VehicleId) {
        let Some(leader) = self.registry.get(car).and_then(|v| v.leader) else {
            self.set_state(car, LifecycleState::NoPlatooning);
            return;
        };
        let Some(pos) = self.registry.position_in_platoon(car) else {
            return;
        };
        if pos == 0 {
            self.set_state(car, LifecycleState::Platoon);
            return;
        }
        let Some(predecessor) = self.registry.get(leader).map(|l| l.members[pos - 1]) else {
            return;
        };

        if !self.registry.on_same_lane_with_leader(car) && self.registry.same_road(car, leader) {
            if let Some(lane) = self.registry.lane(leader) {
                self.set_lane(car, lane, false);
            }
        }

        if self
            .registry
            .distance(car, predecessor)
            .is_some_and(|d| d < self.config.joining.critical_distance)
        {
            if let Some(l) = self.registry.get_mut(leader) {
                l.has_joiner = false;
            }
            self.set_state(car, LifecycleState::Platoon);
        }
    }

    /// One tick of `LeavingProcess`: open a lane gap between the leaver and the
    /// rest of the platoon, then mark the leaver `Left`.
    pub fn prepare_for_remove(&mut self, car: VehicleId) {
        let Some(vehicle) = self.registry.get(car) else {
            return;
        };
        let leader = vehicle.platoon_leader();
        let desired = vehicle.desired_leader.filter(|d| self.registry.contains(*d));
        let own_lane = vehicle.telemetry.lane;
        let own_speed = vehicle.desired_speed();
        let (left_blocked, right_blocked) = (vehicle.telemetry.left_blocked, vehicle.telemetry.right_blocked);

        let Some(l) = self.registry.get_mut(leader) else {
            return;
        };
        l.has_leaver = true;
        let members = l.platoon_members().to_vec();
        let platoon_speed = l.desired_platoon_speed();
        let leader_lane = l.telemetry.lane;

        let everyone_leaving = members.iter().all(|m| {
            matches!(
                self.state(*m),
                Some(LifecycleState::Left | LifecycleState::LeavingProcess)
            )
        });
        if everyone_leaving {
            for &member in &members {
                self.reset_to_single(member);
                self.set_state(member, LifecycleState::NoPlatooning);
            }
            return;
        }

        let leftmost = self.config.lane_count.saturating_sub(1);
        if own_lane < leftmost {
            if let Some(desired) = desired {
                let desired_lane = self.registry.lane(desired).unwrap_or(own_lane);
                if own_lane > desired_lane && !right_blocked {
                    self.set_lane(car, self.right_of(leader_lane), false);
                } else if own_lane == desired_lane && !self.left_lane_blocked(&members) {
                    self.set_platoon_lane(&members, self.left_of(own_lane));
                } else if own_lane < desired_lane && !left_blocked {
                    self.set_lane(car, self.left_of(leader_lane), false);
                }
            } else if (platoon_speed > own_speed || self.take_next_exit(car)) && !self.left_lane_blocked(&members) {
                self.set_platoon_lane(&members, self.left_of(own_lane));
            } else if platoon_speed <= own_speed && !left_blocked {
                self.set_lane(car, self.left_of(leader_lane), false);
            }
        } else if !right_blocked {
            self.set_lane(car, self.right_of(leader_lane), false);
        }

        let head = self.successor(leader, &members);
        if self.registry.lane(car) != self.registry.lane(head) {
            self.set_state(car, LifecycleState::Left);
        }
    }

    /// Leader-only: start a merge into `neighbor`'s platoon if it is ahead far
    /// enough, has room for everyone and nothing sits in between.
    pub fn check_merging(&mut self, car: VehicleId, neighbor: Option<VehicleId>, neighbors: &[VehicleId]) -> bool {
        let Some(front) = neighbor else {
            return false;
        };
        let Some(back) = self.registry.get(car).filter(|v| v.is_leader && !v.has_joiner) else {
            return false;
        };
        let Some(front_leader) = self
            .registry
            .get(front)
            .filter(|v| v.state == LifecycleState::Platoon && v.is_leader)
        else {
            return false;
        };

        let back_members = back.members.clone();
        let Some(&last_front) = front_leader.members.last() else {
            return false;
        };
        let Some(&last_back) = back_members.last() else {
            return false;
        };
        let lane_difference = back.telemetry.lane.abs_diff(front_leader.telemetry.lane) as f64;
        let fits = front_leader.members.len() + back_members.len() <= self.config.max_platoon_size;
        let far_enough = self
            .registry
            .distance(car, last_front)
            .is_some_and(|d| d > (lane_difference + 1.0) * self.config.joining.minimal_distance);

        if !(far_enough && fits) || self.cars_in_between(last_back, front, neighbors) {
            return false;
        }

        if let Some(v) = self.registry.get_mut(car) {
            v.desired_leader = Some(front);
        }
        for &member in &back_members {
            self.set_state(member, LifecycleState::Merging);
        }
        debug!("[Merge] {} heads for {}", car, front);
        true
    }

    /// Leaders may only change lanes on their own while the tail is on the same
    /// road and nobody is joining or leaving.
    pub fn handle_auto_lane_change(&mut self, leader: VehicleId) {
        let Some(l) = self.registry.get(leader) else {
            return;
        };
        let tail = l.platoon_members().last().copied().unwrap_or(leader);
        let allowed = self.registry.same_road(tail, leader) && !l.has_leaver && !l.has_joiner;
        self.outbox.push(leader, Actuation::AutoLaneChange(allowed));
    }

    /// A member found on the wrong lane either bails out (if it is alongside
    /// its leader) or is steered back behind it.
    pub fn check_emergency_quit(&mut self, car: VehicleId, leader: VehicleId) {
        let Some(distance) = self.registry.distance(car, leader) else {
            return;
        };
        if distance < self.config.joining.vehicle_length {
            warn!("🚨 [Platoon] {} emergency quit from {}", car, leader);
            self.set_state(car, LifecycleState::LeavingProcess);
        } else if let Some(lane) = self.registry.lane(leader) {
            self.set_lane(car, lane, false);
        }
    }

    /// Start leaving for a better platoon. Returns true if the switch began.
    pub fn handle_platoon_changing(&mut self, car: VehicleId, neighbor: Option<VehicleId>, neighbors: &[VehicleId]) -> bool {
        let Some(target) = neighbor else {
            return false;
        };
        let Some(other) = self.registry.get(target) else {
            return false;
        };
        let has_room = other.platoon_members().len() < self.config.max_platoon_size;
        let in_range = self
            .registry
            .distance(car, target)
            .is_some_and(|d| d > 0.0 && d < self.config.detection_radius);
        if !has_room || !in_range || self.cars_in_between(car, target, neighbors) {
            return false;
        }
        self.set_state(car, LifecycleState::LeavingProcess);
        if let Some(v) = self.registry.get_mut(car) {
            v.desired_leader = Some(target);
        }
        true
    }
}
