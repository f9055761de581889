//! Error types for the coordination core.

use thiserror::Error;

/// Errors surfaced by the coordination core.
///
/// Stale references and degenerate arithmetic are not errors: they degrade to
/// "no action this tick" for the affected vehicle.
#[derive(Error, Debug)]
pub enum PlatoonError {
    /// Configuration rejected by `PlatoonConfig::validate`.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Leader/member structure violates an invariant.
    #[error("inconsistent topology: {0}")]
    Topology(String),

    /// The world collaborator failed to accept a command.
    #[error("world collaborator failed: {0}")]
    World(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlatoonError>;
