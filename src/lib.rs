//! Kairos - On-Device Adaptive Protocol Recommender
//!
//! Kairos picks a breathing protocol for a stated goal (calm, focus or
//! energy), suggests a session length, and learns from a three-valued rating
//! after each session. It provides:
//! - Beta-Bernoulli posteriors with Thompson sampling
//! - Drift detection that resets items whose ratings turn erratic
//! - Hour-of-day sub-models for contextual selection
//! - Hierarchical pooling across goals and transfer priors for sparse items
//! - An ensemble arbitrator for close calls between leaders
//! - A minimum-effective-dose search over session length
//!
//! # Architecture
//!
//! - **Types**: Goals, feedback deltas, protocols, session records
//! - **Catalog**: The read-only protocol set
//! - **Inference**: Stateless Bayesian primitives
//! - **State**: The persisted learning document and its migration
//! - **Storage**: Load/save of the state document (JSON file or memory)
//! - **Engine**: Phase-ordered selection, feedback and reports
//! - **Simulation**: Synthetic scenarios driving the engine
//!
//! # Example
//!
//! ```ignore
//! use kairos_core::{DecisionEngine, EngineConfig, FeedbackDelta, Goal, JsonFileStore, StaticCatalog};
//!
//! fn main() -> kairos_core::Result<()> {
//!     let store = JsonFileStore::new(kairos_core::default_state_dir());
//!     let mut engine = DecisionEngine::new(StaticCatalog::builtin(), store, EngineConfig::load(None)?);
//!
//!     if let Some(decision) = engine.select_protocol(Goal::Calm)? {
//!         println!("{} for {:.0}s", decision.protocol.name, decision.dose_seconds);
//!         engine.record_feedback(&decision.protocol.id, FeedbackDelta::Better, decision.dose_seconds)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod inference;
pub mod simulation;
pub mod state;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use catalog::{Catalog, StaticCatalog};
pub use config::{DriftResetMode, EngineConfig};
pub use engine::{
    Clock, Decision, DecisionEngine, DecisionTrace, FeedbackOutcome, Insights, ManualClock, Phase,
    SystemClock,
};
pub use error::{KairosError, Result};
pub use state::AppState;
pub use storage::{default_state_dir, JsonFileStore, MemoryStore, StateStore};
pub use types::{FeedbackDelta, Goal, Protocol, SessionRecord};
