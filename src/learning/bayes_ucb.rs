use super::policy::{last_best, PartnerPolicy, PolicyKind, Selection};
use crate::core::vehicle::VehicleId;

/// Bayes-UCB: optimism proportional to the observed spread of each arm.
///
/// `primary` is the running mean, `secondary` the running variance, both
/// maintained with Welford's update on the pulled arm only.
#[derive(Clone, Debug)]
pub struct BayesUcb {
    variance_factor: f64,
}

impl BayesUcb {
    pub fn new(variance_factor: f64) -> Self {
        BayesUcb { variance_factor }
    }

    pub fn score(&self, mean: f64, variance: f64) -> f64 {
        mean + self.variance_factor * variance.max(0.0).sqrt()
    }
}

/// One Welford step: fold `x` into a mean and variance built from `n` samples.
pub fn welford(n: f64, mean: f64, variance: f64, x: f64) -> (f64, f64) {
    let new_mean = (x + n * mean) / (n + 1.0);
    let new_variance = variance + ((x - mean) * (x - new_mean) - variance) / (n + 1.0);
    (new_mean, new_variance.max(0.0))
}

impl PartnerPolicy for BayesUcb {
    fn kind(&self) -> PolicyKind {
        PolicyKind::BayesUcb
    }

    fn select(&self, ctx: &mut Selection<'_>) -> Option<VehicleId> {
        let arms = ctx.arms();
        if arms.is_empty() {
            return None;
        }

        for &(id, h) in &arms {
            if !ctx.cache.contains(id) {
                ctx.record(id, h, h, 0.0);
            }
        }
        let scores: Vec<(VehicleId, f64)> = arms
            .iter()
            .map(|&(id, _)| {
                let value = ctx
                    .cache
                    .get(id)
                    .map_or(0.0, |r| self.score(r.primary, r.secondary));
                (id, value)
            })
            .collect();
        let chosen = last_best(scores)?;
        let current = arms.iter().find(|(id, _)| *id == chosen).map(|&(_, h)| h)?;

        let (n, mean, variance) = ctx
            .cache
            .get(chosen)
            .map_or((0.0, 0.0, 0.0), |r| (r.visits as f64, r.primary, r.secondary));
        let (mean, variance) = welford(n, mean, variance, current);
        let reported = ctx.reported(chosen, current);
        ctx.record(chosen, reported, mean, variance);
        Some(chosen)
    }
}
