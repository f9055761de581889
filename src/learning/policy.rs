//! Partner-selection policy interface.
//!
//! One policy is built at coordinator construction and consulted for every
//! vehicle on selection ticks. A policy sees the vehicle's candidates and its
//! detached relationship cache, writes back what it learned and names the arm
//! it pulled.

use super::bayes_ucb::BayesUcb;
use super::cache::RelationshipCache;
use super::epsilon_greedy::EpsilonGreedy;
use super::heinovski::Heinovski;
use super::reward::RewardModel;
use super::thompson::ThompsonSampling;
use super::ucb::Ucb1;
use crate::core::config::PolicyParams;
use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::VehicleId;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The active policy for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    EpsilonGreedy,
    Ucb1,
    BayesUcb,
    ThompsonSampling,
    /// Deterministic nearest-fit baseline without learning.
    Heinovski,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 5] = [
        PolicyKind::EpsilonGreedy,
        PolicyKind::Ucb1,
        PolicyKind::BayesUcb,
        PolicyKind::ThompsonSampling,
        PolicyKind::Heinovski,
    ];

    /// Whether the policy learns from history (and is therefore subject to visit floors).
    pub fn is_learning(self) -> bool {
        self != PolicyKind::Heinovski
    }

    pub fn build(self, params: &PolicyParams) -> Box<dyn PartnerPolicy> {
        match self {
            PolicyKind::EpsilonGreedy => Box::new(EpsilonGreedy::new(params.epsilon)),
            PolicyKind::Ucb1 => Box::new(Ucb1),
            PolicyKind::BayesUcb => Box::new(BayesUcb::new(params.variance_factor)),
            PolicyKind::ThompsonSampling => Box::new(ThompsonSampling::new(
                params.initial_alpha,
                params.initial_beta,
            )),
            PolicyKind::Heinovski => Box::new(Heinovski),
        }
    }
}

/// Everything a policy may read or write while evaluating one vehicle.
pub struct Selection<'a> {
    pub car: VehicleId,
    /// Sorted by id.
    pub candidates: &'a [VehicleId],
    pub registry: &'a VehicleRegistry,
    pub reward: &'a RewardModel,
    pub cache: &'a mut RelationshipCache,
    /// Record never evicted on overflow.
    pub leader: VehicleId,
    pub rng: &'a mut StdRng,
}

impl<'a> Selection<'a> {
    /// Candidates still registered, paired with their instantaneous happiness.
    pub fn arms(&self) -> Vec<(VehicleId, f64)> {
        self.candidates
            .iter()
            .filter_map(|&c| self.reward.current(self.registry, self.car, c).map(|h| (c, h)))
            .collect()
    }

    /// The value stored as a record's reward for an observation `current`.
    pub fn reported(&self, candidate: VehicleId, current: f64) -> f64 {
        self.reward.fold(current, &*self.cache, candidate)
    }

    pub fn record(&mut self, candidate: VehicleId, reward: f64, primary: f64, secondary: f64) {
        if let Some(evicted) = self
            .cache
            .update(candidate, reward, primary, secondary, Some(self.leader))
        {
            debug!("[Selector] {} forgot {}", self.car, evicted);
        }
    }
}

/// A partner-selection rule. Implementations update the cache for the arm they
/// pull and return it, or `None` when there is nothing to pull.
pub trait PartnerPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    fn select(&self, ctx: &mut Selection<'_>) -> Option<VehicleId>;
}

/// Scan `(id, score)` pairs keeping the last maximum, starting from zero.
pub(crate) fn last_best<I>(scores: I) -> Option<VehicleId>
where
    I: IntoIterator<Item = (VehicleId, f64)>,
{
    let mut best = None;
    let mut best_value = 0.0;
    for (id, value) in scores {
        if value >= best_value {
            best_value = value;
            best = Some(id);
        }
    }
    best
}
