use super::pipeline::Coordinator;
use crate::core::config::PlatoonConfig;
use crate::core::error::PlatoonError;
use crate::core::vehicle::{Telemetry, VehicleId};
use crate::core::world::InMemoryWorld;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: PlatoonError) -> PyErr {
    match e {
        PlatoonError::InvalidConfig(_) | PlatoonError::Serialization(_) => PyValueError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Drives the coordinator from a Python simulator loop: push telemetry rows,
/// tick, then apply the returned commands to the simulator.
#[pyclass]
pub struct PyPlatoonCoordinator {
    coordinator: Coordinator,
    world: InMemoryWorld,
}

#[pymethods]
impl PyPlatoonCoordinator {
    #[new]
    #[pyo3(signature = (config_json=None))]
    pub fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => PlatoonConfig::from_json(json).map_err(to_py_err)?,
            None => PlatoonConfig::default(),
        };
        Ok(Self {
            coordinator: Coordinator::new(config).map_err(to_py_err)?,
            world: InMemoryWorld::new(),
        })
    }

    /// Insert or refresh one vehicle's telemetry for the next tick.
    #[pyo3(signature = (
        id, x, y, lane, road, speed, max_speed, speed_factor, distance_to_end,
        heading=0.0, desired_speed_factor=None, crashed=false, left_blocked=false, right_blocked=false
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_vehicle(
        &mut self,
        id: u32,
        x: f64,
        y: f64,
        lane: u8,
        road: String,
        speed: f64,
        max_speed: f64,
        speed_factor: f64,
        distance_to_end: f64,
        heading: f64,
        desired_speed_factor: Option<f64>,
        crashed: bool,
        left_blocked: bool,
        right_blocked: bool,
    ) {
        self.world.upsert(
            VehicleId(id),
            Telemetry {
                x,
                y,
                heading,
                lane,
                road,
                speed,
                max_speed,
                speed_factor,
                desired_speed_factor: desired_speed_factor.unwrap_or(speed_factor),
                distance_to_end,
                crashed,
                left_blocked,
                right_blocked,
            },
        );
    }

    pub fn remove_vehicle(&mut self, id: u32) -> bool {
        self.world.remove(VehicleId(id)).is_some()
    }

    /// Advance one tick. Returns the report plus the issued commands as JSON.
    pub fn tick(&mut self) -> PyResult<String> {
        let report = self.coordinator.tick(&mut self.world).map_err(to_py_err)?;
        let commands = self.world.take_issued();
        let payload = serde_json::json!({
            "report": report,
            "commands": commands,
        });
        Ok(payload.to_string())
    }

    pub fn snapshot_json(&self) -> PyResult<String> {
        self.coordinator.snapshot().to_json().map_err(to_py_err)
    }

    pub fn vehicle_json(&self, id: u32) -> PyResult<Option<String>> {
        self.coordinator
            .vehicle(VehicleId(id))
            .map(|v| serde_json::to_string(&v).map_err(|e| to_py_err(e.into())))
            .transpose()
    }

    #[getter]
    pub fn tick_count(&self) -> u64 {
        self.coordinator.tick_count()
    }
}
