//! Persistence of the learning state through the JSON file store

mod common;

use common::{calm_catalog, create_temp_store, START_MS};
use kairos_core::storage::STATE_FILE_NAME;
use kairos_core::{
    AppState, DecisionEngine, EngineConfig, FeedbackDelta, Goal, JsonFileStore, ManualClock,
    StateStore, StaticCatalog,
};

fn file_engine(store: JsonFileStore, seed: u64) -> DecisionEngine<StaticCatalog, JsonFileStore> {
    DecisionEngine::new(calm_catalog(&["A", "B"]), store, EngineConfig::default())
        .with_seed(seed)
        .with_clock(ManualClock::new(START_MS))
}

#[test]
fn test_learning_survives_restart() {
    let (dir, store) = create_temp_store();
    let mut engine = file_engine(store, 1);

    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    engine
        .record_feedback(&decision.protocol.id, FeedbackDelta::Better, 100.0)
        .unwrap();
    let saved = engine.load_state().unwrap();
    drop(engine);

    // a fresh engine over the same directory sees the same document
    let engine = file_engine(JsonFileStore::new(dir.path()), 2);
    let reloaded = engine.load_state().unwrap();
    assert_eq!(reloaded, saved);
    assert_eq!(reloaded.total_trials(), 1);
    assert_eq!(reloaded.session_history.len(), 1);
    assert!(reloaded.pending_selection.is_none());
    assert_eq!(
        reloaded.trials(&decision.protocol.id),
        1,
        "posterior should persist"
    );
}

#[test]
fn test_pending_selection_is_persisted() {
    let (dir, store) = create_temp_store();
    let mut engine = file_engine(store, 3);
    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();

    let state = JsonFileStore::new(dir.path()).load_state().unwrap();
    let pending = state.pending_selection.expect("pending selection");
    assert_eq!(pending.protocol_id, decision.protocol.id);
    assert_eq!(pending.goal, Goal::Calm);
    assert_eq!(pending.dose_seconds, decision.dose_seconds);
    assert_eq!(pending.selected_at_ms, START_MS);
}

#[test]
fn test_corrupt_document_starts_fresh() {
    let (dir, store) = create_temp_store();
    std::fs::write(dir.path().join(STATE_FILE_NAME), "not json at all").unwrap();

    let mut engine = file_engine(store, 4);
    assert_eq!(engine.load_state().unwrap(), AppState::default());

    // the next save replaces the corrupt document
    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    let state = JsonFileStore::new(dir.path()).load_state().unwrap();
    assert!(state.posterior(&decision.protocol.id).is_some());
}

#[test]
fn test_legacy_document_is_repaired() {
    let (dir, store) = create_temp_store();
    let legacy = r#"{
        "posteriors": {
            "A": { "trials": 4, "alpha": 4.0, "beta": -2.0, "dose_seconds": 400.0 }
        },
        "current_streak": 3
    }"#;
    std::fs::write(dir.path().join(STATE_FILE_NAME), legacy).unwrap();

    let state = store.load_state().unwrap();
    assert_eq!(state.version, kairos_core::state::STATE_VERSION);
    assert_eq!(state.current_streak, 3);

    let a = state.posterior("A").unwrap();
    assert_eq!(a.trials, 4);
    // an invalid shape falls back to the prior as a pair
    assert_eq!((a.alpha, a.beta), (1.5, 1.0));
    assert_eq!(a.dose_seconds, 180.0);
}

#[test]
fn test_missing_dose_takes_base_duration() {
    let (dir, store) = create_temp_store();
    let legacy = r#"{
        "posteriors": {
            "short": { "trials": 3, "alpha": 3.0, "beta": 2.0 }
        }
    }"#;
    std::fs::write(dir.path().join(STATE_FILE_NAME), legacy).unwrap();

    let mut short = common::protocol("short", &[Goal::Calm]);
    short.base_duration_secs = 60;
    let catalog = StaticCatalog::new(vec![short]).unwrap();
    let mut engine = DecisionEngine::new(catalog, store, EngineConfig::default())
        .with_seed(6)
        .with_clock(ManualClock::new(START_MS));

    let state = engine.load_state().unwrap();
    assert_eq!(state.posterior("short").unwrap().dose_seconds, 60.0);
    assert!(state.unset_doses.is_empty());

    // a Same rating keeps the dose, so it reaches the saved document as-is
    let outcome = engine.record_feedback("short", FeedbackDelta::Same, 60.0).unwrap();
    assert_eq!(outcome.dose_seconds, 60.0);
    let saved = JsonFileStore::new(dir.path()).load_state().unwrap();
    assert_eq!(saved.posterior("short").unwrap().dose_seconds, 60.0);
}

#[test]
fn test_reset_removes_document() {
    let (dir, store) = create_temp_store();
    let mut engine = file_engine(store, 5);
    engine.record_feedback("A", FeedbackDelta::Same, 60.0).unwrap();
    assert!(dir.path().join(STATE_FILE_NAME).exists());

    engine.reset().unwrap();
    assert!(!dir.path().join(STATE_FILE_NAME).exists());
    assert_eq!(engine.load_state().unwrap().total_trials(), 0);
}
