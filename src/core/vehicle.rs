//! Vehicle state owned by the coordination core.

use crate::learning::cache::RelationshipCache;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable vehicle identity. All cross-vehicle links go through this id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v.{}", self.0)
    }
}

/// Per-vehicle lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    NewSpawned,
    SingleCar,
    PrepareJoining,
    JoiningProcess,
    Platoon,
    Merging,
    LeavingProcess,
    Left,
    NoPlatooning,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 9] = [
        LifecycleState::NewSpawned,
        LifecycleState::SingleCar,
        LifecycleState::PrepareJoining,
        LifecycleState::JoiningProcess,
        LifecycleState::Platoon,
        LifecycleState::Merging,
        LifecycleState::LeavingProcess,
        LifecycleState::Left,
        LifecycleState::NoPlatooning,
    ];

    /// States whose vehicles may be addressed as a partner.
    pub fn is_addressable(self) -> bool {
        matches!(self, LifecycleState::SingleCar | LifecycleState::Platoon)
    }
}

/// Read-only view of a vehicle supplied by the world each tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub lane: u8,
    pub road: String,
    pub speed: f64,
    pub max_speed: f64,
    /// Currently applied speed factor.
    pub speed_factor: f64,
    /// Speed factor the vehicle was spawned with.
    pub desired_speed_factor: f64,
    pub distance_to_end: f64,
    pub crashed: bool,
    pub left_blocked: bool,
    pub right_blocked: bool,
}

/// A vehicle as seen by the coordination core.
#[derive(Clone, Debug)]
pub struct Vehicle {
    pub id: VehicleId,
    pub state: LifecycleState,
    /// Platoon leader. `None` while unplatooned; `Some(id)` for a leader itself.
    pub leader: Option<VehicleId>,
    /// Ordered members, leader first. Only populated on leaders.
    pub members: Vec<VehicleId>,
    pub desired_leader: Option<VehicleId>,
    pub is_leader: bool,
    /// Shared by every member, set whenever membership changes.
    pub desired_platoon_speed: Option<f64>,
    pub has_joiner: bool,
    pub has_leaver: bool,
    pub desired_speed_factor: f64,
    pub telemetry: Telemetry,
    pub cache: RelationshipCache,
    pub neighbors: Vec<VehicleId>,
    pub candidates: Vec<VehicleId>,
    /// Hysteresis counter for `NoPlatooning`.
    pub dwell: u32,
    /// Happiness toward the old leader when the vehicle left for a better platoon.
    pub switch_baseline: Option<f64>,
}

impl Vehicle {
    pub fn new(id: VehicleId, telemetry: Telemetry, cache_capacity: usize) -> Self {
        Vehicle {
            id,
            state: LifecycleState::NewSpawned,
            leader: None,
            members: Vec::new(),
            desired_leader: None,
            is_leader: false,
            desired_platoon_speed: None,
            has_joiner: false,
            has_leaver: false,
            desired_speed_factor: telemetry.desired_speed_factor,
            telemetry,
            cache: RelationshipCache::new(cache_capacity),
            neighbors: Vec::new(),
            candidates: Vec::new(),
            dwell: 0,
            switch_baseline: None,
        }
    }

    pub fn is_in_platoon(&self) -> bool {
        self.leader.is_some()
    }

    /// The platoon leader, or the vehicle itself when unplatooned.
    pub fn platoon_leader(&self) -> VehicleId {
        self.leader.unwrap_or(self.id)
    }

    /// Members of the platoon this vehicle leads; a lone vehicle is its own platoon.
    pub fn platoon_members(&self) -> &[VehicleId] {
        if self.members.is_empty() {
            std::slice::from_ref(&self.id)
        } else {
            &self.members
        }
    }

    pub fn desired_speed(&self) -> f64 {
        self.telemetry.max_speed * self.desired_speed_factor
    }

    pub fn desired_platoon_speed(&self) -> f64 {
        match self.desired_platoon_speed {
            Some(speed) if self.is_in_platoon() => speed,
            _ => self.desired_speed(),
        }
    }

    /// Drop all platoon membership data. Cross-vehicle links are the caller's job.
    pub fn clear_platoon(&mut self) {
        self.is_leader = false;
        self.leader = None;
        self.members.clear();
        self.desired_platoon_speed = None;
        self.has_joiner = false;
        self.has_leaver = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry() -> Telemetry {
        Telemetry {
            max_speed: 44.44,
            desired_speed_factor: 0.75,
            ..Telemetry::default()
        }
    }

    #[test]
    fn lone_vehicle_is_its_own_platoon() {
        let v = Vehicle::new(VehicleId(3), telemetry(), 5);
        assert_eq!(v.platoon_leader(), VehicleId(3));
        assert_eq!(v.platoon_members(), &[VehicleId(3)]);
        assert!(!v.is_in_platoon());
    }

    #[test]
    fn platoon_speed_falls_back_to_desired_speed() {
        let mut v = Vehicle::new(VehicleId(1), telemetry(), 5);
        v.desired_platoon_speed = Some(30.0);
        assert!((v.desired_platoon_speed() - 33.33).abs() < 1e-9);
        v.leader = Some(VehicleId(1));
        assert_eq!(v.desired_platoon_speed(), 30.0);
    }

    #[test]
    fn display_matches_simulator_naming() {
        assert_eq!(VehicleId(12).to_string(), "v.12");
    }
}
