// Inference Module - Bayesian learning primitives behind the decision engine
//
// Every function here takes its state and its random source as explicit
// arguments; nothing in this module owns persisted data.
//
// Components:
// - beta: Beta-Bernoulli moments, conjugate updates, Gamma-ratio sampling
// - drift: Rolling-window variance monitor with cooldown-gated resets
// - contextual: Hour-of-day sub-models under each protocol posterior
// - hierarchical: Global -> goal -> item pooling and shrinkage
// - transfer: Feature similarity and borrowed priors for sparse protocols
// - ensemble: Weighted voting across four strategies for close calls
// - exploration: Advisory EVPI gate and decaying exploration budget

pub mod beta;
pub mod contextual;
pub mod drift;
pub mod ensemble;
pub mod exploration;
pub mod hierarchical;
pub mod transfer;

pub use beta::{delta_to_reward, update_posterior, BetaParams};
pub use drift::DriftDetector;
pub use ensemble::{ArmSnapshot, EnsembleArbitrator, EnsembleResult, SelectionStrategy, StrategyVote};
pub use exploration::{evpi, should_explore, ExplorationAdvice, ExplorationBudget};
pub use hierarchical::{
    build_hierarchical_model, diagnose_hierarchical_model, HierarchicalDiagnostics,
    HierarchicalModel, HierarchicalPriors, HyperPrior,
};
pub use transfer::{TransferKnowledge, TransferPrior};
