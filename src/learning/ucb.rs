use super::policy::{last_best, PartnerPolicy, PolicyKind, Selection};
use crate::core::vehicle::VehicleId;

/// UCB1 over the stored reward, with a base-10 log confidence term.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ucb1;

impl Ucb1 {
    pub fn confidence(total_trials: u32, visits: u32) -> f64 {
        (2.0 * ((total_trials + 1) as f64).log10() / (visits + 1) as f64).sqrt()
    }
}

impl PartnerPolicy for Ucb1 {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Ucb1
    }

    fn select(&self, ctx: &mut Selection<'_>) -> Option<VehicleId> {
        let arms = ctx.arms();
        if arms.is_empty() {
            return None;
        }

        for &(id, h) in &arms {
            if !ctx.cache.contains(id) {
                ctx.record(id, h, 0.0, 0.0);
            }
        }
        let total: u32 = arms.iter().map(|&(id, _)| ctx.cache.visits(id)).sum();

        let scores: Vec<(VehicleId, f64)> = arms
            .iter()
            .map(|&(id, _)| {
                let value = ctx.cache.reward(id) + Self::confidence(total, ctx.cache.visits(id));
                (id, value)
            })
            .collect();
        let chosen = last_best(scores)?;
        let current = arms.iter().find(|(id, _)| *id == chosen).map(|&(_, h)| h)?;

        let reported = ctx.reported(chosen, current);
        ctx.record(chosen, reported, 0.0, 0.0);
        Some(chosen)
    }
}
