//! Persisted learning state.
//!
//! `AppState` is the single document the persistence collaborator loads and
//! saves. It is deliberately plain data: the inference modules take it (or
//! pieces of it) as explicit arguments and no copy of it lives anywhere
//! else in the process.
//!
//! Loading always goes through [`migrate`], which fills defaults for missing
//! fields and repairs out-of-range values once, so consumers can rely on
//! every field being present and valid.

pub mod migrate;

use crate::inference::beta::BetaParams;
use crate::inference::hierarchical::HierarchicalModel;
use crate::inference::transfer::TransferKnowledge;
use crate::types::{FeedbackDelta, Goal, SessionRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub use migrate::{from_json, STATE_VERSION};

/// Per-hour Beta posterior layered under an item's global posterior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HourlyPosterior {
    pub trials: u32,
    pub alpha: f64,
    pub beta: f64,
    pub avg: f64,
}

impl HourlyPosterior {
    pub fn new(prior: BetaParams) -> Self {
        Self {
            trials: 0,
            alpha: prior.alpha,
            beta: prior.beta,
            avg: 0.0,
        }
    }

    pub fn params(&self) -> BetaParams {
        BetaParams::new(self.alpha, self.beta)
    }

    pub fn record(&mut self, delta: FeedbackDelta, reward: f64) {
        let updated = self.params().updated(reward);
        self.alpha = updated.alpha;
        self.beta = updated.beta;
        self.trials += 1;
        self.avg += (delta.as_f64() - self.avg) / f64::from(self.trials);
    }
}

/// Everything the engine has learned about one protocol.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemPosterior {
    pub trials: u32,
    pub alpha: f64,
    pub beta: f64,
    pub running_average: f64,
    pub ema_average: f64,
    pub dose_seconds: f64,
    pub hourly: BTreeMap<u8, HourlyPosterior>,
    pub recent_scores: VecDeque<f64>,
    pub recent_variance: f64,
    pub last_reset_ms: Option<i64>,
    pub reset_count: u32,
    pub last_session_ms: Option<i64>,
}

impl ItemPosterior {
    /// Fresh posterior seeded with `prior`, dosed at the protocol's base duration.
    pub fn with_prior(prior: BetaParams, dose_seconds: f64) -> Self {
        Self {
            trials: 0,
            alpha: prior.alpha,
            beta: prior.beta,
            running_average: 0.0,
            ema_average: 0.0,
            dose_seconds,
            hourly: BTreeMap::new(),
            recent_scores: VecDeque::new(),
            recent_variance: 0.0,
            last_reset_ms: None,
            reset_count: 0,
            last_session_ms: None,
        }
    }

    pub fn params(&self) -> BetaParams {
        BetaParams::new(self.alpha, self.beta)
    }

    pub fn mean(&self) -> f64 {
        self.params().mean()
    }

    pub fn variance(&self) -> f64 {
        self.params().variance()
    }

    /// Drop all learned evidence for the item: trials, shape parameters and
    /// dose go back to defaults; the averages are kept as history.
    pub fn full_reset(&mut self, prior: BetaParams, base_dose: f64, now_ms: i64) {
        self.trials = 0;
        self.alpha = prior.alpha;
        self.beta = prior.beta;
        self.dose_seconds = base_dose;
        self.mark_reset(now_ms);
    }

    /// Replace the shape parameters with a recentred, lower-confidence pair.
    pub fn soft_reset(&mut self, recentred: BetaParams, now_ms: i64) {
        let kept_trials = (recentred.alpha + recentred.beta - 2.0).max(0.0).round() as u32;
        self.trials = self.trials.min(kept_trials);
        self.alpha = recentred.alpha;
        self.beta = recentred.beta;
        self.mark_reset(now_ms);
    }

    fn mark_reset(&mut self, now_ms: i64) {
        self.recent_scores.clear();
        self.recent_variance = 0.0;
        self.last_reset_ms = Some(now_ms);
        self.reset_count += 1;
    }
}

/// The most recent selection, kept so feedback can be attributed to a goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingSelection {
    pub protocol_id: String,
    pub goal: Goal,
    pub dose_seconds: f64,
    pub hour: u8,
    pub selected_at_ms: i64,
}

/// The persisted state document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppState {
    pub version: u32,
    pub posteriors: BTreeMap<String, ItemPosterior>,
    pub session_history: Vec<SessionRecord>,
    pub current_streak: u32,
    pub last_session_day: Option<NaiveDate>,
    pub hierarchy: HierarchicalModel,
    pub knowledge: TransferKnowledge,
    pub pending_selection: Option<PendingSelection>,
    /// Posteriors loaded without a dose; they take the protocol's base
    /// duration once the catalog is known.
    #[serde(skip)]
    pub unset_doses: BTreeSet<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            posteriors: BTreeMap::new(),
            session_history: Vec::new(),
            current_streak: 0,
            last_session_day: None,
            hierarchy: HierarchicalModel::default(),
            knowledge: TransferKnowledge::default(),
            pending_selection: None,
            unset_doses: BTreeSet::new(),
        }
    }
}

impl AppState {
    pub fn posterior(&self, protocol_id: &str) -> Option<&ItemPosterior> {
        self.posteriors.get(protocol_id)
    }

    /// Trials recorded for a protocol; zero when it has never been tried.
    pub fn trials(&self, protocol_id: &str) -> u32 {
        self.posterior(protocol_id).map(|p| p.trials).unwrap_or(0)
    }

    pub fn total_trials(&self) -> u64 {
        self.posteriors.values().map(|p| u64::from(p.trials)).sum()
    }

    /// The last `n` feedback deltas for a protocol, oldest first.
    pub fn recent_deltas(&self, protocol_id: &str, n: usize) -> Vec<FeedbackDelta> {
        let mut recent: Vec<FeedbackDelta> = self
            .session_history
            .iter()
            .rev()
            .filter(|r| r.protocol_id == protocol_id)
            .take(n)
            .map(|r| r.delta)
            .collect();
        recent.reverse();
        recent
    }

    /// Give every posterior loaded without a dose its base duration.
    ///
    /// Ids the lookup does not know keep the placeholder dose.
    pub fn fill_unset_doses<F>(&mut self, base_duration: F)
    where
        F: Fn(&str) -> Option<f64>,
    {
        let unset = std::mem::take(&mut self.unset_doses);
        for id in unset {
            match (base_duration(&id), self.posteriors.get_mut(&id)) {
                (Some(dose), Some(posterior)) => posterior.dose_seconds = dose,
                _ => {
                    self.unset_doses.insert(id);
                }
            }
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(protocol: &str, delta: FeedbackDelta, ts: i64) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            timestamp_ms: ts,
            goal: Goal::Calm,
            protocol_id: protocol.to_string(),
            duration_secs: 60.0,
            delta,
        }
    }

    #[test]
    fn test_recent_deltas_filters_and_orders() {
        let mut state = AppState::default();
        state.session_history = vec![
            record("a", FeedbackDelta::Worse, 1),
            record("b", FeedbackDelta::Better, 2),
            record("a", FeedbackDelta::Same, 3),
            record("a", FeedbackDelta::Better, 4),
        ];

        assert_eq!(
            state.recent_deltas("a", 2),
            vec![FeedbackDelta::Same, FeedbackDelta::Better]
        );
        assert_eq!(state.recent_deltas("c", 3), Vec::<FeedbackDelta>::new());
    }

    #[test]
    fn test_json_reloads_through_migration() {
        let mut state = AppState::default();
        state.current_streak = 4;
        state.session_history = vec![record("a", FeedbackDelta::Better, 7)];

        let reloaded = from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, state);
    }

    #[test]
    fn test_fill_unset_doses_uses_lookup() {
        let mut state = from_json(
            r#"{"posteriors": {"a": {"trials": 2}, "b": {"trials": 1}, "c": {"dose_seconds": 70.0}}}"#,
        )
        .unwrap();
        assert_eq!(state.unset_doses.len(), 2);

        state.fill_unset_doses(|id| (id == "a").then_some(150.0));
        assert_eq!(state.posterior("a").unwrap().dose_seconds, 150.0);
        assert_eq!(state.posterior("c").unwrap().dose_seconds, 70.0);
        // unknown to the lookup: still waiting
        assert!(state.unset_doses.contains("b"));
        assert!(!state.unset_doses.contains("a"));
    }

    #[test]
    fn test_full_reset_restores_defaults() {
        let mut posterior = ItemPosterior::with_prior(BetaParams::new(1.5, 1.0), 120.0);
        posterior.trials = 30;
        posterior.alpha = 25.0;
        posterior.beta = 8.0;
        posterior.dose_seconds = 75.0;
        posterior.recent_scores.extend([1.0, -1.0, 1.0]);
        posterior.recent_variance = 0.9;

        posterior.full_reset(BetaParams::new(1.5, 1.0), 120.0, 5_000);

        assert_eq!(posterior.trials, 0);
        assert_eq!(posterior.alpha, 1.5);
        assert_eq!(posterior.beta, 1.0);
        assert_eq!(posterior.dose_seconds, 120.0);
        assert!(posterior.recent_scores.is_empty());
        assert_eq!(posterior.last_reset_ms, Some(5_000));
        assert_eq!(posterior.reset_count, 1);
    }

    #[test]
    fn test_hourly_record_tracks_average() {
        let mut hourly = HourlyPosterior::new(BetaParams::new(1.5, 1.0));
        hourly.record(FeedbackDelta::Better, 1.0);
        hourly.record(FeedbackDelta::Worse, 0.0);
        assert_eq!(hourly.trials, 2);
        assert_eq!(hourly.avg, 0.0);
        assert_eq!(hourly.alpha, 2.5);
        assert_eq!(hourly.beta, 2.0);
    }
}
