//! Applying a session rating to the learning state.
//!
//! One rating touches every learner: the item's Beta posterior, its hourly
//! sub-model, the drift window, running and exponential averages, the dose,
//! the hierarchical model and the transfer knowledge base. The session is
//! appended to history and the daily streak advanced.

use crate::config::{DoseConfig, EngineConfig};
use crate::inference::beta::{delta_to_reward, BetaParams};
use crate::inference::contextual::record_hourly;
use crate::inference::drift::DriftDetector;
use crate::state::{AppState, ItemPosterior};
use crate::types::{FeedbackDelta, Goal, Protocol, SessionRecord};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Step for the next dose change.
///
/// `recent` holds the latest outcomes for the protocol, oldest first, with
/// the current rating last.
pub fn dose_step(recent: &[FeedbackDelta], config: &DoseConfig) -> f64 {
    let last_two = &recent[recent.len().saturating_sub(2)..];
    let last_three = &recent[recent.len().saturating_sub(3)..];

    if !last_two.is_empty() && last_two.iter().all(|d| *d == FeedbackDelta::Better) {
        config.momentum_step
    } else if last_three.contains(&FeedbackDelta::Worse) {
        config.recovery_step
    } else {
        config.default_step
    }
}

/// Minimum-effective-dose search: shorter after "better", longer after
/// "worse", unchanged after "same".
pub fn adjust_dose(current: f64, delta: FeedbackDelta, recent: &[FeedbackDelta], config: &DoseConfig) -> f64 {
    match delta {
        FeedbackDelta::Better => (current - dose_step(recent, config)).max(config.min_secs),
        FeedbackDelta::Worse => (current + dose_step(recent, config)).min(config.max_secs),
        FeedbackDelta::Same => current.clamp(config.min_secs, config.max_secs),
    }
}

/// Advance a daily streak.
pub fn update_streak(streak: u32, last_day: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_day {
        Some(day) if day == today => streak.max(1),
        Some(day) if day.succ_opt() == Some(today) => streak + 1,
        _ => 1,
    }
}

/// What a rating changed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedbackOutcome {
    pub protocol_id: String,
    pub goal: Goal,
    pub delta: FeedbackDelta,
    pub reward: f64,
    pub trials: u32,
    pub mean: f64,
    pub previous_dose: f64,
    pub dose_seconds: f64,
    pub recent_variance: f64,
    pub current_streak: u32,
}

/// Time of the rating.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackTime {
    pub now_ms: i64,
    pub hour: u8,
    pub today: NaiveDate,
}

/// Apply one rating to `state`.
#[allow(clippy::too_many_arguments)]
pub fn apply_feedback(
    state: &mut AppState,
    protocol: &Protocol,
    goal: Goal,
    delta: FeedbackDelta,
    duration_secs: f64,
    time: FeedbackTime,
    config: &EngineConfig,
    drift: &DriftDetector,
) -> FeedbackOutcome {
    let prior = BetaParams::new(config.prior.alpha, config.prior.beta);
    let reward = delta_to_reward(delta);
    let raw = delta.as_f64();

    state.session_history.push(SessionRecord {
        id: Uuid::new_v4(),
        timestamp_ms: time.now_ms,
        goal,
        protocol_id: protocol.id.clone(),
        duration_secs,
        delta,
    });
    let recent = state.recent_deltas(&protocol.id, 3);

    let posterior = state
        .posteriors
        .entry(protocol.id.clone())
        .or_insert_with(|| ItemPosterior::with_prior(prior, protocol.base_duration()));

    let updated = posterior.params().updated(reward);
    posterior.alpha = updated.alpha;
    posterior.beta = updated.beta;
    posterior.trials += 1;

    record_hourly(posterior, time.hour, delta, reward, prior);

    drift.push_score(&mut posterior.recent_scores, raw);
    posterior.recent_variance = drift.variance(&posterior.recent_scores);

    let n = f64::from(posterior.trials);
    posterior.running_average += (raw - posterior.running_average) / n;
    posterior.ema_average = if posterior.trials == 1 {
        raw
    } else {
        posterior.ema_average + config.prior.ema_smoothing * (raw - posterior.ema_average)
    };

    let previous_dose = posterior.dose_seconds;
    posterior.dose_seconds = adjust_dose(previous_dose, delta, &recent, &config.dose);
    posterior.last_session_ms = Some(time.now_ms);

    let trials = posterior.trials;
    let mean = posterior.mean();
    let dose_seconds = posterior.dose_seconds;
    let recent_variance = posterior.recent_variance;

    state
        .hierarchy
        .record(&protocol.id, goal, reward, prior, &config.hierarchy);
    state
        .knowledge
        .record_performance(&protocol.id, goal, reward, time.now_ms);
    state.knowledge.update_embedding(&protocol.id, goal, reward);

    state.current_streak = update_streak(state.current_streak, state.last_session_day, time.today);
    state.last_session_day = Some(time.today);

    if state
        .pending_selection
        .as_ref()
        .is_some_and(|p| p.protocol_id == protocol.id)
    {
        state.pending_selection = None;
    }

    debug!(
        protocol = %protocol.id,
        %goal,
        %delta,
        trials,
        mean,
        dose_seconds,
        "Feedback applied"
    );

    FeedbackOutcome {
        protocol_id: protocol.id.clone(),
        goal,
        delta,
        reward,
        trials,
        mean,
        previous_dose,
        dose_seconds,
        recent_variance,
        current_streak: state.current_streak,
    }
}
