//! Platoon Core - cooperative platooning for simulated highway traffic
//!
//! Vehicles discover nearby partners, learn which ones make them happiest
//! with a multi-armed bandit policy, and form, grow, merge and dissolve
//! platoons through a per-vehicle lifecycle state machine. The traffic
//! simulator stays outside: it is reached through the [`World`] trait.

pub mod coordinator;
pub mod core;
pub mod learning;
pub mod platoon;
pub mod spatial;

#[cfg(feature = "python")]
use pyo3::prelude::*;

// Re-export key types for embedding
pub use crate::coordinator::{Coordinator, FleetSnapshot, TickReport, VehicleSnapshot};
pub use crate::core::config::PlatoonConfig;
pub use crate::core::error::{PlatoonError, Result};
pub use crate::core::vehicle::{LifecycleState, Telemetry, VehicleId};
pub use crate::core::world::{Actuation, InMemoryWorld, World};
pub use crate::learning::{PolicyKind, RelationshipCache, RewardModel};
pub use crate::platoon::{Counters, HappinessChange};
pub use crate::spatial::SpatialIndex;

/// Initialize tracing for the library.
#[cfg_attr(feature = "python", pyfunction)]
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Python module initialization
#[cfg(feature = "python")]
#[pymodule]
fn platoon_core(_py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<coordinator::py_api::PyPlatoonCoordinator>()?;
    m.add_function(wrap_pyfunction!(setup_logging, m)?)?;
    Ok(())
}
