//! Integration tests for the decision engine
//!
//! Exercises the phase table, feedback path and reports through the public
//! engine API over an in-memory store.

mod common;

use common::{calm_catalog, create_test_engine, posterior};
use kairos_core::engine::Insights;
use kairos_core::{AppState, Catalog, FeedbackDelta, Goal, Phase, StaticCatalog};
use std::collections::HashSet;

#[test]
fn test_every_candidate_tried_before_learning() {
    let catalog = StaticCatalog::builtin();
    let calm_count = catalog.by_goal(Goal::Calm).len();
    let (mut engine, clock) = create_test_engine(catalog, AppState::default(), 3);

    let mut seen = HashSet::new();
    for _ in 0..calm_count {
        let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
        assert!(decision.trace.decided_by(Phase::Untried));
        assert_eq!(decision.dose_seconds, decision.protocol.base_duration());
        assert!(seen.insert(decision.protocol.id.clone()), "protocol repeated");

        engine
            .record_feedback(&decision.protocol.id, FeedbackDelta::Same, decision.dose_seconds)
            .unwrap();
        clock.advance(60_000);
    }
    assert_eq!(seen.len(), calm_count);

    // every calm protocol now has one trial, so the undertried phase takes over
    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    assert!(decision.trace.decided_by(Phase::Undertried));
}

#[test]
fn test_no_candidates_for_goal() {
    let (mut engine, _) = create_test_engine(calm_catalog(&["A"]), AppState::default(), 1);
    assert!(engine.select_protocol(Goal::Energy).unwrap().is_none());
}

#[test]
fn test_close_competition_uses_ensemble() {
    let mut state = AppState::default();
    state.posteriors.insert("A".to_string(), posterior(20.0, 6.0, 25));
    state.posteriors.insert("B".to_string(), posterior(19.5, 6.0, 25));
    let (mut engine, _) = create_test_engine(calm_catalog(&["A", "B"]), state, 9);

    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    assert!(decision.trace.decided_by(Phase::CloseCompetition));

    let ensemble = decision.trace.ensemble.as_ref().expect("ensemble result");
    assert_eq!(ensemble.winner, decision.protocol.id);
    assert!((0.0..=1.0).contains(&ensemble.consensus_score));
    assert_eq!(ensemble.votes.len(), 4);
    assert_eq!(decision.dose_seconds, 120.0);
}

#[test]
fn test_close_competition_needs_enough_trials() {
    let mut state = AppState::default();
    state.posteriors.insert("A".to_string(), posterior(8.0, 4.0, 10));
    state.posteriors.insert("B".to_string(), posterior(7.9, 4.0, 10));
    let (mut engine, _) = create_test_engine(calm_catalog(&["A", "B"]), state, 9);

    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    assert!(decision.trace.decided_by(Phase::Standard));
    assert!(decision.trace.ensemble.is_none());
    assert_eq!(decision.trace.scores.len(), 2);
}

#[test]
fn test_drift_sweep_resets_erratic_protocol() {
    let mut state = AppState::default();
    let mut erratic = posterior(8.0, 5.0, 10);
    erratic.recent_scores = [1.0, -1.0, 1.0, -1.0, 1.0].into_iter().collect();
    erratic.dose_seconds = 60.0;
    state.posteriors.insert("A".to_string(), erratic);
    state.posteriors.insert("B".to_string(), posterior(6.0, 5.0, 10));
    let (mut engine, _) = create_test_engine(calm_catalog(&["A", "B"]), state, 5);

    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    assert_eq!(decision.trace.drift_resets.len(), 1);
    let reset = &decision.trace.drift_resets[0];
    assert_eq!(reset.protocol_id, "A");
    assert_eq!(reset.trials_before, 10);
    assert!((reset.variance - 0.96).abs() < 1e-9);

    let state = engine.load_state().unwrap();
    let a = state.posterior("A").unwrap();
    assert_eq!(a.trials, 0);
    assert_eq!((a.alpha, a.beta), (1.5, 1.0));
    assert_eq!(a.dose_seconds, 120.0);
    assert_eq!(a.reset_count, 1);
    assert!(a.recent_scores.is_empty());

    // the reset protocol is untried again
    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    assert!(decision.trace.decided_by(Phase::Untried));
    assert_eq!(decision.protocol.id, "A");
}

#[test]
fn test_new_protocol_borrows_prior_from_similar() {
    let mut state = AppState::default();
    state.posteriors.insert("A".to_string(), posterior(20.0, 2.0, 20));
    let (mut engine, _) = create_test_engine(calm_catalog(&["A", "B"]), state, 2);

    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    assert_eq!(decision.protocol.id, "B");
    assert!(decision.trace.decided_by(Phase::Untried));

    let transfer = decision.trace.transfer.as_ref().expect("transferred prior");
    assert_eq!(transfer.neighbors.len(), 1);
    assert_eq!(transfer.neighbors[0].0, "A");

    let state = engine.load_state().unwrap();
    let b = state.posterior("B").unwrap();
    assert_eq!(b.trials, 0);
    assert!((b.alpha - 12.6).abs() < 1e-9);
    assert!((b.beta - 1.6).abs() < 1e-9);
}

#[test]
fn test_dose_schedule_follows_feedback() {
    let (mut engine, clock) = create_test_engine(calm_catalog(&["A"]), AppState::default(), 1);

    let mut doses = Vec::new();
    for _ in 0..3 {
        let outcome = engine
            .record_feedback("A", FeedbackDelta::Better, 120.0)
            .unwrap();
        doses.push(outcome.dose_seconds);
        clock.advance(60_000);
    }
    assert_eq!(doses, [110.0, 100.0, 90.0]);

    let outcome = engine.record_feedback("A", FeedbackDelta::Worse, 90.0).unwrap();
    assert_eq!(outcome.previous_dose, 90.0);
    assert_eq!(outcome.dose_seconds, 110.0);

    let outcome = engine.record_feedback("A", FeedbackDelta::Same, 110.0).unwrap();
    assert_eq!(outcome.dose_seconds, 110.0);
}

#[test]
fn test_selection_uses_learned_dose_after_exploration() {
    let mut state = AppState::default();
    let mut learned = posterior(30.0, 2.0, 30);
    learned.dose_seconds = 75.0;
    state.posteriors.insert("A".to_string(), learned);
    let (mut engine, _) = create_test_engine(calm_catalog(&["A"]), state, 4);

    let decision = engine.select_protocol(Goal::Calm).unwrap().unwrap();
    assert!(decision.trace.decided_by(Phase::Standard));
    assert_eq!(decision.dose_seconds, 75.0);
}

#[test]
fn test_feedback_goal_attribution() {
    let catalog = StaticCatalog::new(vec![
        common::protocol("A", &[Goal::Calm, Goal::Focus]),
    ])
    .unwrap();
    let (mut engine, _) = create_test_engine(catalog, AppState::default(), 8);

    // no pending selection: first listed goal
    let outcome = engine.record_feedback("A", FeedbackDelta::Better, 60.0).unwrap();
    assert_eq!(outcome.goal, Goal::Calm);

    engine.select_protocol(Goal::Focus).unwrap().unwrap();
    let outcome = engine.record_feedback("A", FeedbackDelta::Better, 60.0).unwrap();
    assert_eq!(outcome.goal, Goal::Focus);

    let outcome = engine
        .record_feedback_for_goal("A", Goal::Energy, FeedbackDelta::Same, 60.0)
        .unwrap();
    assert_eq!(outcome.goal, Goal::Energy);
}

#[test]
fn test_streak_across_days() {
    let (mut engine, clock) = create_test_engine(calm_catalog(&["A"]), AppState::default(), 1);
    let day = 24 * 3_600_000;

    assert_eq!(engine.record_feedback("A", FeedbackDelta::Same, 60.0).unwrap().current_streak, 1);
    clock.advance(60_000);
    assert_eq!(engine.record_feedback("A", FeedbackDelta::Same, 60.0).unwrap().current_streak, 1);
    clock.advance(day);
    assert_eq!(engine.record_feedback("A", FeedbackDelta::Same, 60.0).unwrap().current_streak, 2);
    clock.advance(3 * day);
    assert_eq!(engine.record_feedback("A", FeedbackDelta::Same, 60.0).unwrap().current_streak, 1);
}

#[test]
fn test_reports_do_not_mutate_state() {
    let (mut engine, _) = create_test_engine(StaticCatalog::builtin(), AppState::default(), 6);
    assert_eq!(engine.insights().unwrap(), Insights::NoData);

    engine
        .record_feedback("box-breathing", FeedbackDelta::Better, 120.0)
        .unwrap();
    let before = engine.load_state().unwrap();

    let Insights::Summary(summary) = engine.insights().unwrap() else {
        panic!("expected a summary");
    };
    assert_eq!(summary.total_sessions, 1);
    assert_eq!(summary.current_streak, 1);

    let metrics = engine.algorithm_metrics().unwrap();
    assert_eq!(metrics.total_trials, 1);
    let recs = engine.top_recommendations(Goal::Focus, 2).unwrap();
    assert_eq!(recs.len(), 2);

    assert_eq!(engine.load_state().unwrap(), before);
}
