use super::error::{PlatoonError, Result};
use super::vehicle::{Telemetry, Vehicle, VehicleId};
use std::collections::BTreeMap;
use tracing::debug;

/// Signed gap from `a` to `b`: Euclidean distance minus one vehicle length,
/// negative when `b` is behind `a`.
pub fn signed_distance(a: &Telemetry, b: &Telemetry, vehicle_length: f64) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let distance = (dx * dx + dy * dy).sqrt() - vehicle_length;
    if a.x > b.x {
        -distance
    } else {
        distance
    }
}

/// Identity-keyed vehicle table. Iteration is always in ascending id order.
#[derive(Clone, Debug)]
pub struct VehicleRegistry {
    vehicles: BTreeMap<VehicleId, Vehicle>,
    vehicle_length: f64,
}

impl VehicleRegistry {
    pub fn new(vehicle_length: f64) -> Self {
        VehicleRegistry {
            vehicles: BTreeMap::new(),
            vehicle_length,
        }
    }

    pub fn insert(&mut self, vehicle: Vehicle) {
        debug!("[Registry] Registered {}", vehicle.id);
        self.vehicles.insert(vehicle.id, vehicle);
    }

    pub fn remove(&mut self, id: VehicleId) -> Option<Vehicle> {
        self.vehicles.remove(&id)
    }

    pub fn get(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn get_mut(&mut self, id: VehicleId) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(&id)
    }

    pub fn contains(&self, id: VehicleId) -> bool {
        self.vehicles.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<VehicleId> {
        self.vehicles.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn vehicle_length(&self) -> f64 {
        self.vehicle_length
    }

    /// Signed distance from `a` to `b`, `None` if either is gone.
    pub fn distance(&self, a: VehicleId, b: VehicleId) -> Option<f64> {
        let va = self.vehicles.get(&a)?;
        let vb = self.vehicles.get(&b)?;
        Some(signed_distance(&va.telemetry, &vb.telemetry, self.vehicle_length))
    }

    /// Index of `id` inside its leader's member list.
    pub fn position_in_platoon(&self, id: VehicleId) -> Option<usize> {
        let vehicle = self.vehicles.get(&id)?;
        let leader = self.vehicles.get(&vehicle.leader?)?;
        leader.platoon_members().iter().position(|m| *m == id)
    }

    /// The vehicle that speaks for `id`'s platoon.
    pub fn resolve_leader(&self, id: VehicleId) -> Option<VehicleId> {
        let vehicle = self.vehicles.get(&id)?;
        let leader = vehicle.platoon_leader();
        self.vehicles.contains_key(&leader).then_some(leader)
    }

    pub fn lane(&self, id: VehicleId) -> Option<u8> {
        self.vehicles.get(&id).map(|v| v.telemetry.lane)
    }

    /// Same lane and same heading as the vehicle's leader (or desired leader while unplatooned).
    pub fn on_same_lane_with_leader(&self, id: VehicleId) -> bool {
        let Some(vehicle) = self.vehicles.get(&id) else {
            return false;
        };
        let target = match vehicle.leader {
            Some(leader) => leader,
            None => match vehicle.desired_leader {
                Some(desired) => desired,
                None => return false,
            },
        };
        match self.vehicles.get(&target) {
            Some(other) => {
                vehicle.telemetry.lane == other.telemetry.lane
                    && (vehicle.telemetry.heading - other.telemetry.heading).abs() < 1e-6
            }
            None => false,
        }
    }

    pub fn same_road(&self, a: VehicleId, b: VehicleId) -> bool {
        match (self.vehicles.get(&a), self.vehicles.get(&b)) {
            (Some(va), Some(vb)) => va.telemetry.road == vb.telemetry.road,
            _ => false,
        }
    }

    /// Verify the leader/member invariants and the cache bound.
    pub fn check_consistency(&self, max_platoon_size: usize) -> Result<()> {
        for vehicle in self.vehicles.values() {
            if vehicle.cache.len() > vehicle.cache.capacity() {
                return Err(PlatoonError::Topology(format!(
                    "{} holds {} cache records, capacity {}",
                    vehicle.id,
                    vehicle.cache.len(),
                    vehicle.cache.capacity()
                )));
            }

            if let Some(leader_id) = vehicle.leader {
                let leader = self.vehicles.get(&leader_id).ok_or_else(|| {
                    PlatoonError::Topology(format!(
                        "{} follows {} which no longer exists",
                        vehicle.id, leader_id
                    ))
                })?;
                if !leader.is_leader || leader.leader != Some(leader_id) {
                    return Err(PlatoonError::Topology(format!(
                        "{} follows {} which is not leading",
                        vehicle.id, leader_id
                    )));
                }
                if !leader.members.contains(&vehicle.id) {
                    return Err(PlatoonError::Topology(format!(
                        "{} missing from member list of {}",
                        vehicle.id, leader_id
                    )));
                }
                if leader.desired_platoon_speed != vehicle.desired_platoon_speed {
                    return Err(PlatoonError::Topology(format!(
                        "{} and its leader {} disagree on platoon speed",
                        vehicle.id, leader_id
                    )));
                }
            }

            if vehicle.is_leader {
                if vehicle.leader != Some(vehicle.id) {
                    return Err(PlatoonError::Topology(format!(
                        "leader {} does not lead itself",
                        vehicle.id
                    )));
                }
                if vehicle.members.first() != Some(&vehicle.id) {
                    return Err(PlatoonError::Topology(format!(
                        "leader {} is not first in its member list",
                        vehicle.id
                    )));
                }
                if vehicle.members.len() > max_platoon_size {
                    return Err(PlatoonError::Topology(format!(
                        "platoon of {} exceeds capacity ({} > {})",
                        vehicle.id,
                        vehicle.members.len(),
                        max_platoon_size
                    )));
                }
                for (i, member) in vehicle.members.iter().enumerate() {
                    if vehicle.members[..i].contains(member) {
                        return Err(PlatoonError::Topology(format!(
                            "{} listed twice in platoon of {}",
                            member, vehicle.id
                        )));
                    }
                    let follows = self.vehicles.get(member).and_then(|m| m.leader);
                    if follows != Some(vehicle.id) {
                        return Err(PlatoonError::Topology(format!(
                            "{} listed in platoon of {} but follows {:?}",
                            member, vehicle.id, follows
                        )));
                    }
                }
            } else if !vehicle.members.is_empty() {
                return Err(PlatoonError::Topology(format!(
                    "non-leader {} carries a member list",
                    vehicle.id
                )));
            }
        }
        Ok(())
    }
}
