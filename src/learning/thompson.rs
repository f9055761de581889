use super::policy::{last_best, PartnerPolicy, PolicyKind, Selection};
use crate::core::vehicle::VehicleId;
use rand_distr::{Beta, Distribution};
use tracing::warn;

/// Thompson sampling with a Beta posterior per candidate.
///
/// `primary` is α, `secondary` is β. Happiness in [0, 1] is treated as a
/// fractional success.
#[derive(Clone, Debug)]
pub struct ThompsonSampling {
    initial_alpha: f64,
    initial_beta: f64,
}

impl ThompsonSampling {
    pub fn new(initial_alpha: f64, initial_beta: f64) -> Self {
        ThompsonSampling {
            initial_alpha,
            initial_beta,
        }
    }
}

impl PartnerPolicy for ThompsonSampling {
    fn kind(&self) -> PolicyKind {
        PolicyKind::ThompsonSampling
    }

    fn select(&self, ctx: &mut Selection<'_>) -> Option<VehicleId> {
        let arms = ctx.arms();
        if arms.is_empty() {
            return None;
        }

        for &(id, h) in &arms {
            if !ctx.cache.contains(id) {
                ctx.record(id, h, self.initial_alpha, self.initial_beta);
            }
        }

        let mut samples = Vec::with_capacity(arms.len());
        for &(id, _) in &arms {
            let (alpha, beta) = ctx
                .cache
                .get(id)
                .map_or((self.initial_alpha, self.initial_beta), |r| (r.primary, r.secondary));
            match Beta::new(alpha, beta) {
                Ok(dist) => samples.push((id, dist.sample(&mut *ctx.rng))),
                Err(e) => warn!("[Selector] Skipping {} for {}: Beta({}, {}) {}", id, ctx.car, alpha, beta, e),
            }
        }
        let chosen = last_best(samples)?;
        let current = arms.iter().find(|(id, _)| *id == chosen).map(|&(_, h)| h)?;

        let (alpha, beta) = ctx
            .cache
            .get(chosen)
            .map_or((self.initial_alpha, self.initial_beta), |r| (r.primary, r.secondary));
        let reported = ctx.reported(chosen, current);
        ctx.record(chosen, reported, alpha + current, beta + (1.0 - current));
        Some(chosen)
    }
}
