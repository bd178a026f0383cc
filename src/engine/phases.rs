//! The selection policy as an ordered decision table.
//!
//! Phases are evaluated top to bottom and the first one that selects wins.
//! Each phase is a named function over a [`PhaseContext`]; the drift sweep
//! is a side-effect phase that resets drifting candidates and never selects.

use super::trace::{CandidateScore, DecisionTrace, DriftReset};
use crate::catalog::Catalog;
use crate::config::{DriftResetMode, EngineConfig};
use crate::inference::beta::BetaParams;
use crate::inference::contextual::{hourly_trials, sample_contextual};
use crate::inference::drift::DriftDetector;
use crate::inference::ensemble::{ArmSnapshot, EnsembleArbitrator};
use crate::state::AppState;
use crate::types::{Goal, Protocol};
use rand::{Rng, RngCore};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use tracing::{debug, info};

/// Named phases of the selection policy.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Untried,
    Undertried,
    HourlyExploration,
    DriftSweep,
    CloseCompetition,
    Standard,
}

impl Phase {
    /// Evaluation order; first selecting phase wins.
    pub const ORDER: [Phase; 6] = [
        Phase::Untried,
        Phase::Undertried,
        Phase::HourlyExploration,
        Phase::DriftSweep,
        Phase::CloseCompetition,
        Phase::Standard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Untried => "untried",
            Phase::Undertried => "undertried",
            Phase::HourlyExploration => "hourly_exploration",
            Phase::DriftSweep => "drift_sweep",
            Phase::CloseCompetition => "close_competition",
            Phase::Standard => "standard",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs shared by every phase.
pub struct PhaseContext<'a> {
    pub candidates: &'a [Protocol],
    pub state: &'a mut AppState,
    pub config: &'a EngineConfig,
    pub drift: &'a DriftDetector,
    pub ensemble: &'a EnsembleArbitrator,
    pub now_ms: i64,
    pub hour: u8,
    pub rng: &'a mut dyn RngCore,
}

impl PhaseContext<'_> {
    fn trials(&self, protocol: &Protocol) -> u32 {
        self.state.trials(&protocol.id)
    }

    fn ema(&self, protocol: &Protocol) -> f64 {
        self.state
            .posterior(&protocol.id)
            .map(|p| p.ema_average)
            .unwrap_or(0.0)
    }

    fn params(&self, protocol: &Protocol) -> BetaParams {
        self.state
            .posterior(&protocol.id)
            .map(|p| p.params())
            .unwrap_or_else(|| self.default_prior())
    }

    fn default_prior(&self) -> BetaParams {
        BetaParams::new(self.config.prior.alpha, self.config.prior.beta)
    }

    /// Learned dose when the protocol has a posterior, else its base duration.
    fn dose(&self, protocol: &Protocol) -> f64 {
        self.state
            .posterior(&protocol.id)
            .map(|p| p.dose_seconds)
            .unwrap_or_else(|| protocol.base_duration())
    }

    fn snapshot(&self, protocol: &Protocol, score: Option<f64>) -> CandidateScore {
        CandidateScore {
            protocol_id: protocol.id.clone(),
            trials: self.trials(protocol),
            mean: self.params(protocol).mean(),
            score,
        }
    }

    fn pick_uniform<'p>(&mut self, pool: &[&'p Protocol]) -> Option<&'p Protocol> {
        if pool.is_empty() {
            return None;
        }
        Some(pool[self.rng.gen_range(0..pool.len())])
    }
}

/// The pick made by a selecting phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub protocol_id: String,
    pub dose_seconds: f64,
    pub phase: Phase,
}

/// Result of evaluating one phase.
#[derive(Debug)]
pub enum PhaseOutcome {
    Selected(Selection),
    Continue,
}

/// Evaluate the table in order, recording provenance into `trace`.
pub fn run(ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> Option<Selection> {
    trace.candidates = ctx.candidates.len();
    for phase in Phase::ORDER {
        trace.phases_evaluated.push(phase);
        if let PhaseOutcome::Selected(selection) = evaluate(phase, ctx, trace) {
            trace.phase = Some(phase);
            return Some(selection);
        }
    }
    None
}

/// Evaluate a single phase.
pub fn evaluate(phase: Phase, ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> PhaseOutcome {
    match phase {
        Phase::Untried => untried(ctx, trace),
        Phase::Undertried => undertried(ctx, trace),
        Phase::HourlyExploration => hourly_exploration(ctx, trace),
        Phase::DriftSweep => drift_sweep(ctx, trace),
        Phase::CloseCompetition => close_competition(ctx, trace),
        Phase::Standard => standard(ctx, trace),
    }
}

fn select(protocol: &Protocol, dose_seconds: f64, phase: Phase) -> PhaseOutcome {
    PhaseOutcome::Selected(Selection {
        protocol_id: protocol.id.clone(),
        dose_seconds,
        phase,
    })
}

fn untried(ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> PhaseOutcome {
    let candidates = ctx.candidates;
    let pool: Vec<&Protocol> = candidates.iter().filter(|p| ctx.trials(p) == 0).collect();
    let Some(protocol) = ctx.pick_uniform(&pool) else {
        return PhaseOutcome::Continue;
    };

    trace.scores = pool.iter().map(|p| ctx.snapshot(p, None)).collect();
    trace.reason = format!("{} untried among {} candidates", pool.len(), candidates.len());
    select(protocol, protocol.base_duration(), Phase::Untried)
}

fn undertried(ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> PhaseOutcome {
    let candidates = ctx.candidates;
    let min_trials = ctx.config.selection.min_trials_for_thompson;
    let harmful = ctx.config.selection.harmful_ema_threshold;

    let pool: Vec<&Protocol> = candidates
        .iter()
        .filter(|p| ctx.trials(p) < min_trials && ctx.ema(p) >= harmful)
        .collect();
    let Some(protocol) = ctx.pick_uniform(&pool) else {
        return PhaseOutcome::Continue;
    };

    trace.scores = pool.iter().map(|p| ctx.snapshot(p, None)).collect();
    trace.reason = format!("{} candidates below {} trials", pool.len(), min_trials);
    select(protocol, protocol.base_duration(), Phase::Undertried)
}

fn hourly_exploration(ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> PhaseOutcome {
    if !ctx.config.selection.contextual_selection {
        return PhaseOutcome::Continue;
    }

    let candidates = ctx.candidates;
    let hour = ctx.hour;
    let min_hourly = ctx.config.selection.min_hourly_exploration;
    let pool: Vec<&Protocol> = candidates
        .iter()
        .filter(|p| {
            ctx.state
                .posterior(&p.id)
                .map_or(true, |posterior| hourly_trials(posterior, hour) < min_hourly)
        })
        .collect();
    let Some(protocol) = ctx.pick_uniform(&pool) else {
        return PhaseOutcome::Continue;
    };

    trace.scores = pool.iter().map(|p| ctx.snapshot(p, None)).collect();
    trace.reason = format!(
        "{} candidates below {} trials at hour {}",
        pool.len(),
        min_hourly,
        hour
    );
    let dose = ctx.dose(protocol);
    select(protocol, dose, Phase::HourlyExploration)
}

fn drift_sweep(ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> PhaseOutcome {
    let prior = ctx.default_prior();
    let mode = ctx.config.drift.reset_mode;
    let candidates = ctx.candidates;

    for protocol in candidates {
        let Some(posterior) = ctx.state.posteriors.get_mut(&protocol.id) else {
            continue;
        };

        let variance = ctx.drift.variance(&posterior.recent_scores);
        posterior.recent_variance = variance;
        if !ctx.drift.should_reset(variance, posterior.last_reset_ms, ctx.now_ms) {
            continue;
        }

        let trials_before = posterior.trials;
        match mode {
            DriftResetMode::Full => {
                posterior.full_reset(prior, protocol.base_duration(), ctx.now_ms)
            }
            DriftResetMode::Soft => {
                let recentred = ctx.drift.soft_reset(posterior.params());
                posterior.soft_reset(recentred, ctx.now_ms)
            }
        }

        info!(
            protocol = %protocol.id,
            variance,
            trials_before,
            "Drift detected, posterior reset"
        );
        trace.drift_resets.push(DriftReset {
            protocol_id: protocol.id.clone(),
            variance,
            mode,
            trials_before,
        });
    }

    PhaseOutcome::Continue
}

fn close_competition(ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> PhaseOutcome {
    let candidates = ctx.candidates;
    let mut ranked: Vec<(&Protocol, f64)> = candidates
        .iter()
        .filter(|p| ctx.trials(p) >= 1)
        .map(|p| (p, ctx.params(p).mean()))
        .collect();
    if ranked.len() < 2 {
        return PhaseOutcome::Continue;
    }
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let min_trials = ctx.config.selection.close_competition_min_trials;
    let (first, first_mean) = ranked[0];
    let (second, second_mean) = ranked[1];
    let close = ctx.trials(first) >= min_trials
        && ctx.trials(second) >= min_trials
        && (first_mean - second_mean).abs() < ctx.config.selection.close_competition_margin;
    if !close {
        return PhaseOutcome::Continue;
    }

    let arms: Vec<ArmSnapshot> = ranked
        .iter()
        .map(|(p, _)| ArmSnapshot::new(p.id.clone(), ctx.params(p), ctx.trials(p)))
        .collect();
    let total_trials: u64 = arms.iter().map(|a| u64::from(a.trials)).sum();

    let Some(result) = ctx.ensemble.decide(&arms, total_trials, &mut *ctx.rng) else {
        return PhaseOutcome::Continue;
    };
    let Some(winner) = candidates.iter().find(|p| p.id == result.winner) else {
        return PhaseOutcome::Continue;
    };

    trace.scores = ranked
        .iter()
        .map(|(p, _)| ctx.snapshot(p, result.weighted_scores.get(&p.id).copied()))
        .collect();
    trace.reason = format!(
        "{} and {} within {:.3}; {}",
        first.id,
        second.id,
        (first_mean - second_mean).abs(),
        result.explanation
    );
    debug!(winner = %winner.id, consensus = result.consensus_score, "Close competition");

    let dose = ctx.dose(winner);
    trace.ensemble = Some(result);
    select(winner, dose, Phase::CloseCompetition)
}

fn standard(ctx: &mut PhaseContext<'_>, trace: &mut DecisionTrace) -> PhaseOutcome {
    let candidates = ctx.candidates;
    let min_trials = ctx.config.selection.min_trials_for_thompson;
    let bonus = ctx.config.selection.uncertainty_bonus;
    let sparse_bonus = ctx.config.selection.sparse_item_bonus;
    let contextual = ctx.config.selection.contextual_selection;
    let hour = ctx.hour;

    let mut scores = Vec::with_capacity(candidates.len());
    let mut best: Option<(&Protocol, f64)> = None;

    for protocol in candidates {
        let score = match ctx.state.posterior(&protocol.id) {
            Some(posterior) if posterior.trials >= min_trials => {
                let sample = if contextual {
                    sample_contextual(posterior, hour, &mut *ctx.rng)
                } else {
                    posterior.params().sample(&mut *ctx.rng)
                };
                sample + posterior.variance().sqrt() * bonus
            }
            _ => ctx.rng.gen::<f64>() + sparse_bonus,
        };

        scores.push(ctx.snapshot(protocol, Some(score)));
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((protocol, score));
        }
    }

    let Some((protocol, score)) = best else {
        return PhaseOutcome::Continue;
    };

    trace.scores = scores;
    trace.reason = format!("thompson sample {:.3} highest of {}", score, candidates.len());
    let dose = ctx.dose(protocol);
    select(protocol, dose, Phase::Standard)
}

/// Candidates for a goal, cloned out of the catalog.
pub fn candidates_for<C: Catalog + ?Sized>(catalog: &C, goal: Goal) -> Vec<Protocol> {
    catalog.by_goal(goal).into_iter().cloned().collect()
}
