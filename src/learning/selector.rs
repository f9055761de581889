use super::cache::RelationshipCache;
use super::commit::CommitPolicy;
use super::policy::{PartnerPolicy, PolicyKind, Selection};
use super::reward::RewardModel;
use crate::core::config::PlatoonConfig;
use crate::core::registry::VehicleRegistry;
use crate::core::vehicle::VehicleId;
use rand::rngs::StdRng;
use tracing::debug;

/// Bandit selector: the run's policy plus the reward model and commit policy it feeds.
pub struct PartnerSelector {
    policy: Box<dyn PartnerPolicy>,
    reward: RewardModel,
    commit: CommitPolicy,
}

impl PartnerSelector {
    pub fn new(config: &PlatoonConfig) -> Self {
        PartnerSelector {
            policy: config.decision.policy.build(&config.policy),
            reward: RewardModel::new(config),
            commit: CommitPolicy::new(config),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.policy.kind()
    }

    pub fn reward(&self) -> &RewardModel {
        &self.reward
    }

    /// Learn from the vehicle's current candidates, then decide whether to move.
    ///
    /// Candidates must already be stored on the vehicle. Returns the partner to
    /// commit to, or `None` to stay put.
    pub fn evaluate(&self, registry: &mut VehicleRegistry, car: VehicleId, rng: &mut StdRng) -> Option<VehicleId> {
        let vehicle = registry.get_mut(car)?;
        let candidates = vehicle.candidates.clone();
        let leader = vehicle.platoon_leader();
        let capacity = vehicle.cache.capacity();
        let mut cache = std::mem::replace(&mut vehicle.cache, RelationshipCache::new(capacity));

        let pulled = {
            let mut ctx = Selection {
                car,
                candidates: &candidates,
                registry: &*registry,
                reward: &self.reward,
                cache: &mut cache,
                leader,
                rng: &mut *rng,
            };
            self.policy.select(&mut ctx)
        };

        if let Some(vehicle) = registry.get_mut(car) {
            vehicle.cache = cache;
        }
        if let Some(arm) = pulled {
            debug!("[Selector] {} pulled {} of {} candidates", car, arm, candidates.len());
        }

        self.commit.choose(registry, &self.reward, car)
    }
}
