//! Platoon topology, maneuvers and the per-vehicle lifecycle.

pub mod lifecycle;
pub mod maneuvers;
pub mod topology;

pub use lifecycle::{ChangeScope, Counters, HappinessChange, Lifecycle};
pub use maneuvers::JoinProgress;
pub use topology::{MergeOutcome, Topology};
