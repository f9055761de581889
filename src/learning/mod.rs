//! Online partner learning: relationship cache, happiness model, the five
//! selection policies and the commit policy gating topology changes.

pub mod bayes_ucb;
pub mod cache;
pub mod commit;
pub mod epsilon_greedy;
pub mod heinovski;
pub mod policy;
pub mod reward;
pub mod selector;
pub mod thompson;
pub mod ucb;

pub use cache::{HappinessRecord, RelationshipCache};
pub use commit::CommitPolicy;
pub use policy::{PartnerPolicy, PolicyKind, Selection};
pub use reward::{Happiness, RewardModel};
pub use selector::PartnerSelector;
