//! Core data model: configuration, errors, vehicles, the registry and the world interface.

pub mod config;
pub mod error;
pub mod registry;
pub mod vehicle;
pub mod world;

pub use config::{DecisionConfig, HappinessMode, JoiningConfig, PlatoonConfig, PolicyParams, RewardWeights};
pub use error::{PlatoonError, Result};
pub use registry::{signed_distance, VehicleRegistry};
pub use vehicle::{LifecycleState, Telemetry, Vehicle, VehicleId};
pub use world::{Actuation, ControllerMode, InMemoryWorld, Outbox, World};
