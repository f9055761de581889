//! World collaborator interface.
//!
//! The world owns kinematics, lane-change execution and spawning. The core
//! reads one telemetry snapshot per vehicle per tick and answers with
//! actuation commands.

use super::error::{PlatoonError, Result};
use super::vehicle::{Telemetry, VehicleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longitudinal controller driving a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerMode {
    /// Human driver model.
    Driver,
    /// Autonomous cruise control, used by platoon leaders.
    Acc,
    /// Cooperative cruise control, used by followers.
    Cacc,
}

/// A command issued to the world for one vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Actuation {
    SetLane { lane: u8, cautious: bool },
    ReleaseLane,
    AutoLaneChange(bool),
    Controller(ControllerMode),
    CruiseParams { target_gap: f64, desired_speed: f64, headway: f64 },
    DesiredSpeed(f64),
    Follow { leader: VehicleId, front: VehicleId },
    Unfollow,
    RegisterMember { member: VehicleId, position: usize },
    SpeedFactor(f64),
    Remove,
}

/// The simulated world as seen from the coordination core.
pub trait World {
    /// Vehicles currently present, in any order.
    fn vehicle_ids(&self) -> Vec<VehicleId>;

    fn telemetry(&self, id: VehicleId) -> Option<Telemetry>;

    fn actuate(&mut self, id: VehicleId, command: Actuation) -> Result<()>;
}

/// Commands queued during a tick and flushed once it completes.
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    commands: Vec<(VehicleId, Actuation)>,
}

impl Outbox {
    pub fn push(&mut self, id: VehicleId, command: Actuation) {
        self.commands.push((id, command));
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[(VehicleId, Actuation)] {
        &self.commands
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, (VehicleId, Actuation)> {
        self.commands.drain(..)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Drop everything queued for `id`. Returns how many commands were discarded.
    pub fn discard_for(&mut self, id: VehicleId) -> usize {
        let before = self.commands.len();
        self.commands.retain(|(target, _)| *target != id);
        before - self.commands.len()
    }
}

/// Table-backed world: telemetry rows are written by a driver, commands are recorded.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWorld {
    vehicles: BTreeMap<VehicleId, Telemetry>,
    issued: Vec<(VehicleId, Actuation)>,
    /// Refuse commands after this many have been accepted. Used to exercise tick rollback.
    fail_after: Option<usize>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, id: VehicleId, telemetry: Telemetry) {
        self.vehicles.insert(id, telemetry);
    }

    pub fn remove(&mut self, id: VehicleId) -> Option<Telemetry> {
        self.vehicles.remove(&id)
    }

    pub fn get_mut(&mut self, id: VehicleId) -> Option<&mut Telemetry> {
        self.vehicles.get_mut(&id)
    }

    pub fn issued(&self) -> &[(VehicleId, Actuation)] {
        &self.issued
    }

    pub fn take_issued(&mut self) -> Vec<(VehicleId, Actuation)> {
        std::mem::take(&mut self.issued)
    }

    pub fn fail_after(&mut self, accepted: Option<usize>) {
        self.fail_after = accepted;
    }
}

impl World for InMemoryWorld {
    fn vehicle_ids(&self) -> Vec<VehicleId> {
        self.vehicles.keys().copied().collect()
    }

    fn telemetry(&self, id: VehicleId) -> Option<Telemetry> {
        self.vehicles.get(&id).cloned()
    }

    fn actuate(&mut self, id: VehicleId, command: Actuation) -> Result<()> {
        if let Some(limit) = self.fail_after {
            if self.issued.len() >= limit {
                return Err(PlatoonError::World(format!(
                    "command {:?} for {} refused",
                    command, id
                )));
            }
        }
        match command {
            Actuation::Remove => {
                self.vehicles.remove(&id);
            }
            Actuation::SpeedFactor(factor) => {
                if let Some(t) = self.vehicles.get_mut(&id) {
                    t.speed_factor = factor;
                }
            }
            _ => {}
        }
        self.issued.push((id, command));
        Ok(())
    }
}
