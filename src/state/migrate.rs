//! Load-time default filling and repair.
//!
//! Stored documents are parsed into permissive shapes where every field is
//! optional, then normalised into the strict in-memory types exactly once.
//! Older documents without a `version`, fields written by a previous build,
//! or values knocked out of range by hand edits all end up as valid state.

use super::{AppState, HourlyPosterior, ItemPosterior, PendingSelection};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::inference::hierarchical::HierarchicalModel;
use crate::inference::transfer::TransferKnowledge;
use crate::types::SessionRecord;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

/// Current document version.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredState {
    version: Option<u32>,
    posteriors: BTreeMap<String, StoredPosterior>,
    session_history: Vec<SessionRecord>,
    current_streak: Option<u32>,
    last_session_day: Option<NaiveDate>,
    hierarchy: Option<HierarchicalModel>,
    knowledge: Option<TransferKnowledge>,
    pending_selection: Option<PendingSelection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredPosterior {
    trials: Option<u32>,
    alpha: Option<f64>,
    beta: Option<f64>,
    running_average: Option<f64>,
    ema_average: Option<f64>,
    dose_seconds: Option<f64>,
    hourly: BTreeMap<u8, HourlyPosterior>,
    recent_scores: Vec<f64>,
    recent_variance: Option<f64>,
    last_reset_ms: Option<i64>,
    reset_count: Option<u32>,
    last_session_ms: Option<i64>,
}

/// Parse and normalise a stored document with the default configuration.
pub fn from_json(json: &str) -> Result<AppState> {
    from_json_with(json, &EngineConfig::default())
}

/// Parse and normalise a stored document.
pub fn from_json_with(json: &str, config: &EngineConfig) -> Result<AppState> {
    let stored: StoredState = serde_json::from_str(json)?;
    Ok(normalize(stored, config))
}

fn normalize(stored: StoredState, config: &EngineConfig) -> AppState {
    let version = stored.version.unwrap_or(0);
    if version != STATE_VERSION {
        debug!(
            "Upgrading state document from version {} to {}",
            version, STATE_VERSION
        );
    }

    let unset_doses = stored
        .posteriors
        .iter()
        .filter(|(_, p)| !matches!(p.dose_seconds, Some(v) if v.is_finite()))
        .map(|(id, _)| id.clone())
        .collect();

    let posteriors = stored
        .posteriors
        .into_iter()
        .map(|(id, p)| {
            let posterior = normalize_posterior(&id, p, config);
            (id, posterior)
        })
        .collect();

    let mut knowledge = stored.knowledge.unwrap_or_default();
    knowledge.repair();

    AppState {
        version: STATE_VERSION,
        posteriors,
        session_history: stored.session_history,
        current_streak: stored.current_streak.unwrap_or(0),
        last_session_day: stored.last_session_day,
        hierarchy: stored.hierarchy.unwrap_or_default(),
        knowledge,
        pending_selection: stored.pending_selection,
        unset_doses,
    }
}

fn finite_or(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => default,
    }
}

fn normalize_posterior(id: &str, p: StoredPosterior, config: &EngineConfig) -> ItemPosterior {
    let prior = &config.prior;
    let dose = &config.dose;

    let mut alpha = finite_or(p.alpha, prior.alpha);
    let mut beta = finite_or(p.beta, prior.beta);
    if alpha < 1.0 || beta < 1.0 {
        warn!(
            "Posterior for {} had invalid shape ({}, {}), restoring prior",
            id, alpha, beta
        );
        alpha = prior.alpha;
        beta = prior.beta;
    }

    // placeholder until the catalog supplies the base duration
    let midpoint = (dose.min_secs + dose.max_secs) / 2.0;
    let dose_seconds = finite_or(p.dose_seconds, midpoint).clamp(dose.min_secs, dose.max_secs);

    let mut recent_scores: VecDeque<f64> = p
        .recent_scores
        .into_iter()
        .filter(|v| v.is_finite())
        .collect();
    while recent_scores.len() > config.drift.window_size {
        recent_scores.pop_front();
    }

    let hourly = p
        .hourly
        .into_iter()
        .filter(|(hour, h)| *hour < 24 && h.alpha.is_finite() && h.beta.is_finite())
        .collect();

    ItemPosterior {
        trials: p.trials.unwrap_or(0),
        alpha,
        beta,
        running_average: finite_or(p.running_average, 0.0).clamp(-1.0, 1.0),
        ema_average: finite_or(p.ema_average, 0.0).clamp(-1.0, 1.0),
        dose_seconds,
        hourly,
        recent_scores,
        recent_variance: finite_or(p.recent_variance, 0.0).max(0.0),
        last_reset_ms: p.last_reset_ms,
        reset_count: p.reset_count.unwrap_or(0),
        last_session_ms: p.last_session_ms,
    }
}
