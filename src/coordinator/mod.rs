//! The per-tick coordinator and its outer surfaces.

pub mod pipeline;
pub mod snapshot;

#[cfg(feature = "python")]
pub mod py_api;


pub use pipeline::{Coordinator, TickReport};
pub use snapshot::{FleetSnapshot, VehicleSnapshot};
