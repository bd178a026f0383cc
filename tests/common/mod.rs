//! Common test utilities and helpers

#![allow(dead_code)]

use kairos_core::inference::BetaParams;
use kairos_core::state::ItemPosterior;
use kairos_core::{
    AppState, DecisionEngine, EngineConfig, Goal, JsonFileStore, ManualClock, MemoryStore,
    Protocol, StaticCatalog,
};
use tempfile::TempDir;

/// 2026-01-01T08:00:00Z
pub const START_MS: i64 = 1_767_254_400_000;

pub fn protocol(id: &str, goals: &[Goal]) -> Protocol {
    Protocol {
        id: id.to_string(),
        name: format!("Protocol {}", id),
        goals: goals.to_vec(),
        base_duration_secs: 120,
        cues: Vec::new(),
    }
}

/// Catalog of 120-second protocols supporting only calm
pub fn calm_catalog(ids: &[&str]) -> StaticCatalog {
    StaticCatalog::new(ids.iter().map(|id| protocol(id, &[Goal::Calm])).collect())
        .expect("Failed to build test catalog")
}

/// Seeded engine over an in-memory store and a manual clock
pub fn create_test_engine(
    catalog: StaticCatalog,
    state: AppState,
    seed: u64,
) -> (DecisionEngine<StaticCatalog, MemoryStore>, ManualClock) {
    let clock = ManualClock::new(START_MS);
    let engine = DecisionEngine::new(catalog, MemoryStore::with_state(state), EngineConfig::default())
        .with_seed(seed)
        .with_clock(clock.clone());
    (engine, clock)
}

/// Posterior with the given shape and trial count, dosed at 120s
pub fn posterior(alpha: f64, beta: f64, trials: u32) -> ItemPosterior {
    let mut posterior = ItemPosterior::with_prior(BetaParams::new(alpha, beta), 120.0);
    posterior.trials = trials;
    posterior
}

/// JSON file store rooted in a fresh temp directory
pub fn create_temp_store() -> (TempDir, JsonFileStore) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = JsonFileStore::new(dir.path());
    (dir, store)
}
