use super::error::{PlatoonError, Result};
use crate::learning::PolicyKind;
use serde::{Deserialize, Serialize};

/// Distances and speeds governing join/leave maneuvers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JoiningConfig {
    pub vehicle_length: f64,
    /// Target gap between consecutive platoon members.
    pub inter_vehicle_gap: f64,
    /// Minimal distance behind a platoon tail before a join is attempted, scaled per lane of offset.
    pub minimal_distance: f64,
    /// A joiner closer than this to its predecessor counts as joined.
    pub critical_distance: f64,
    /// Distance before the route end at which a vehicle starts leaving.
    pub exit_lead_distance: f64,
    pub min_joining_speed: f64,
    pub headway_time: f64,
}

impl Default for JoiningConfig {
    fn default() -> Self {
        JoiningConfig {
            vehicle_length: 4.0,
            inter_vehicle_gap: 5.0,
            minimal_distance: 12.0,
            critical_distance: 10.0,
            exit_lead_distance: 1200.0,
            min_joining_speed: 10.0,
            headway_time: 1.5,
        }
    }
}

/// How the reward written back into the relationship cache is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HappinessMode {
    /// Instantaneous happiness.
    Current,
    /// Running mean of the cached value and the instantaneous one.
    Mean,
}

/// Bandit selection and anti-thrashing parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub policy: PolicyKind,
    pub happiness_mode: HappinessMode,
    /// Margin `t` a new partner must clear over the current leader.
    pub changing_margin: f64,
    /// Visit floor `w` before a platooned vehicle trusts a candidate.
    pub visit_floor: u32,
    /// Relationship cache capacity `K`.
    pub cache_capacity: usize,
    /// Ticks between bandit evaluations.
    pub selection_interval: u64,
    /// Ticks spent in `NoPlatooning` before becoming a single car again.
    pub no_platooning_dwell: u32,
    pub merging_enabled: bool,
    pub seed: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            policy: PolicyKind::EpsilonGreedy,
            happiness_mode: HappinessMode::Current,
            changing_margin: 0.0,
            visit_floor: 1,
            cache_capacity: 5,
            selection_interval: 5,
            no_platooning_dwell: 20,
            merging_enabled: true,
            seed: 4,
        }
    }
}

/// Weights of the four happiness components. Normalized at evaluation time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardWeights {
    pub speed: f64,
    pub size: f64,
    pub end: f64,
    pub gap: f64,
    /// Low-speed band removed before comparing speeds.
    pub speed_offset: f64,
    pub speed_epsilon: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        RewardWeights {
            speed: 2.0,
            size: 2.0,
            end: 1.0,
            gap: 1.0,
            speed_offset: 19.0,
            speed_epsilon: 0.1,
        }
    }
}

impl RewardWeights {
    pub fn total(&self) -> f64 {
        self.speed + self.size + self.end + self.gap
    }
}

/// Per-policy hyperparameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyParams {
    pub epsilon: f64,
    pub variance_factor: f64,
    pub initial_alpha: f64,
    pub initial_beta: f64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        PolicyParams {
            epsilon: 0.1,
            variance_factor: 2.0,
            initial_alpha: 1.0,
            initial_beta: 1.0,
        }
    }
}

/// Run-wide configuration, fixed at coordinator construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatoonConfig {
    pub detection_radius: f64,
    pub max_platoon_size: usize,
    pub lane_count: u8,
    /// Roads on which platooning is allowed. Empty means every road.
    pub highway_roads: Vec<String>,
    pub joining: JoiningConfig,
    pub decision: DecisionConfig,
    pub weights: RewardWeights,
    pub policy: PolicyParams,
}

impl Default for PlatoonConfig {
    fn default() -> Self {
        PlatoonConfig {
            detection_radius: 150.0,
            max_platoon_size: 8,
            lane_count: 4,
            highway_roads: ["E2", "E6", "E10", "E14"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            joining: JoiningConfig::default(),
            decision: DecisionConfig::default(),
            weights: RewardWeights::default(),
            policy: PolicyParams::default(),
        }
    }
}

impl PlatoonConfig {
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.decision.policy = policy;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: PlatoonConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.detection_radius > 0.0) {
            return Err(PlatoonError::InvalidConfig(format!(
                "detection_radius must be positive, got {}",
                self.detection_radius
            )));
        }
        if self.max_platoon_size < 2 {
            return Err(PlatoonError::InvalidConfig(
                "max_platoon_size must allow at least two vehicles".to_string(),
            ));
        }
        if self.decision.cache_capacity == 0 {
            return Err(PlatoonError::InvalidConfig(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.decision.selection_interval == 0 {
            return Err(PlatoonError::InvalidConfig(
                "selection_interval must be at least 1".to_string(),
            ));
        }
        if !(self.weights.total() > 0.0) {
            return Err(PlatoonError::InvalidConfig(
                "reward weights must not sum to zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.policy.epsilon) {
            return Err(PlatoonError::InvalidConfig(format!(
                "epsilon must lie in [0, 1], got {}",
                self.policy.epsilon
            )));
        }
        if !(self.policy.initial_alpha > 0.0 && self.policy.initial_beta > 0.0) {
            return Err(PlatoonError::InvalidConfig(
                "Beta priors must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a road admits platooning.
    pub fn is_highway(&self, road: &str) -> bool {
        self.highway_roads.is_empty() || self.highway_roads.iter().any(|r| r == road)
    }

    /// Road space one member occupies in the queue.
    pub fn slot_length(&self) -> f64 {
        self.joining.inter_vehicle_gap + self.joining.vehicle_length
    }
}
