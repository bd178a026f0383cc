//! Synthetic scenarios for exercising the decision engine.
//!
//! Each scenario is a set of arms with fixed (or switching) success rates.
//! The harness drives a [`DecisionEngine`] over an in-memory store and a
//! manual clock, feeding it ratings drawn from a separate environment
//! random source so runs are reproducible per seed.

use crate::catalog::StaticCatalog;
use crate::config::EngineConfig;
use crate::engine::{DecisionEngine, ManualClock, Phase};
use crate::error::{KairosError, Result};
use crate::state::AppState;
use crate::storage::MemoryStore;
use crate::types::{FeedbackDelta, Goal, Protocol};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

/// 2026-01-01T08:00:00Z
pub const SIMULATION_START_MS: i64 = 1_767_254_400_000;

/// A synthetic protocol with a success probability.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Arm {
    pub protocol_id: String,
    pub success_rate: f64,
    /// Switch to a new rate from this trial onward.
    pub change: Option<(usize, f64)>,
}

impl Arm {
    pub fn new(protocol_id: &str, success_rate: f64) -> Self {
        Self {
            protocol_id: protocol_id.to_string(),
            success_rate,
            change: None,
        }
    }

    pub fn changing_at(mut self, trial: usize, new_rate: f64) -> Self {
        self.change = Some((trial, new_rate));
        self
    }

    pub fn rate_at(&self, trial: usize) -> f64 {
        match self.change {
            Some((at, rate)) if trial >= at => rate,
            _ => self.success_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub goal: Goal,
    pub arms: Vec<Arm>,
    pub trials: usize,
    /// Clock advance between trials.
    pub step_ms: i64,
}

impl Scenario {
    pub const NAMES: [&'static str; 3] = ["clear-winner", "close-competition", "drift"];

    /// One arm clearly dominates.
    pub fn clear_winner() -> Self {
        Self {
            name: "clear-winner".to_string(),
            goal: Goal::Calm,
            arms: vec![
                Arm::new("A", 0.9),
                Arm::new("B", 0.5),
                Arm::new("C", 0.3),
            ],
            trials: 200,
            step_ms: 60_000,
        }
    }

    /// Two leaders within a few points of each other.
    pub fn close_competition() -> Self {
        Self {
            name: "close-competition".to_string(),
            goal: Goal::Calm,
            arms: vec![
                Arm::new("A", 0.80),
                Arm::new("B", 0.78),
                Arm::new("C", 0.30),
            ],
            trials: 200,
            step_ms: 15_000,
        }
    }

    /// The leader degrades halfway through while a rival improves.
    pub fn drift() -> Self {
        Self {
            name: "drift".to_string(),
            goal: Goal::Calm,
            arms: vec![
                Arm::new("X", 0.8).changing_at(100, 0.3),
                Arm::new("Y", 0.5).changing_at(100, 0.7),
            ],
            trials: 200,
            step_ms: 60_000,
        }
    }

    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            "clear-winner" => Ok(Self::clear_winner()),
            "close-competition" => Ok(Self::close_competition()),
            "drift" => Ok(Self::drift()),
            other => Err(KairosError::Other(format!(
                "Unknown scenario '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }

    fn catalog(&self) -> Result<StaticCatalog> {
        let protocols = self
            .arms
            .iter()
            .map(|arm| Protocol {
                id: arm.protocol_id.clone(),
                name: format!("Arm {}", arm.protocol_id),
                goals: vec![self.goal],
                base_duration_secs: 120,
                cues: Vec::new(),
            })
            .collect();
        StaticCatalog::new(protocols)
    }

    fn arm(&self, protocol_id: &str) -> Option<&Arm> {
        self.arms.iter().find(|a| a.protocol_id == protocol_id)
    }

    fn standings(&self, state: &AppState) -> Vec<ArmStanding> {
        self.arms
            .iter()
            .map(|arm| {
                let posterior = state.posterior(&arm.protocol_id);
                ArmStanding {
                    protocol_id: arm.protocol_id.clone(),
                    trials: posterior.map_or(0, |p| p.trials),
                    mean: posterior.map_or(0.0, |p| p.params().mean()),
                }
            })
            .collect()
    }
}

/// An arm's learned standing going into a trial.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArmStanding {
    pub protocol_id: String,
    pub trials: u32,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimulationStep {
    pub trial: usize,
    pub protocol_id: String,
    pub phase: Option<Phase>,
    pub delta: FeedbackDelta,
    /// Standings before the selection, in catalog order.
    pub standings: Vec<ArmStanding>,
    /// Posteriors reset by the drift sweep during this selection.
    pub drift_resets: usize,
}

impl SimulationStep {
    /// The two best arms by mean among those tried at least once.
    ///
    /// Ties keep catalog order, matching the engine's ranking.
    pub fn leaders(&self) -> Option<(&ArmStanding, &ArmStanding)> {
        let mut ranked: Vec<&ArmStanding> = self.standings.iter().filter(|a| a.trials >= 1).collect();
        ranked.sort_by(|a, b| b.mean.partial_cmp(&a.mean).unwrap_or(Ordering::Equal));
        match ranked.as_slice() {
            [first, second, ..] => Some((*first, *second)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimulationReport {
    pub scenario: String,
    pub seed: u64,
    pub steps: Vec<SimulationStep>,
}

impl SimulationReport {
    /// Fraction of the last `n` selections that picked `protocol_id`.
    pub fn share_in_last(&self, protocol_id: &str, n: usize) -> f64 {
        let tail = &self.steps[self.steps.len().saturating_sub(n)..];
        if tail.is_empty() {
            return 0.0;
        }
        tail.iter().filter(|s| s.protocol_id == protocol_id).count() as f64 / tail.len() as f64
    }

    /// Number of selections made by `phase`.
    pub fn phase_count(&self, phase: Phase) -> usize {
        self.steps.iter().filter(|s| s.phase == Some(phase)).count()
    }

    pub fn selections(&self, protocol_id: &str) -> usize {
        self.steps.iter().filter(|s| s.protocol_id == protocol_id).count()
    }
}

/// A success rates "better"; a failure is "worse" or "same" with equal odds.
fn draw_feedback<R: Rng + ?Sized>(success_rate: f64, rng: &mut R) -> FeedbackDelta {
    if rng.gen::<f64>() < success_rate {
        FeedbackDelta::Better
    } else if rng.gen_bool(0.5) {
        FeedbackDelta::Worse
    } else {
        FeedbackDelta::Same
    }
}

/// Drive the engine through `scenario`.
pub fn run(scenario: &Scenario, seed: u64, config: EngineConfig) -> Result<SimulationReport> {
    let clock = ManualClock::new(SIMULATION_START_MS);
    let mut engine = DecisionEngine::new(scenario.catalog()?, MemoryStore::new(), config)
        .with_seed(seed)
        .with_clock(clock.clone());
    let mut environment = StdRng::seed_from_u64(seed.wrapping_add(1));

    let mut steps = Vec::with_capacity(scenario.trials);
    for trial in 0..scenario.trials {
        let standings = scenario.standings(&engine.load_state()?);
        let Some(decision) = engine.select_protocol(scenario.goal)? else {
            break;
        };
        let arm = scenario
            .arm(&decision.protocol.id)
            .ok_or_else(|| KairosError::UnknownProtocol(decision.protocol.id.clone()))?;
        let delta = draw_feedback(arm.rate_at(trial), &mut environment);
        engine.record_feedback(&decision.protocol.id, delta, decision.dose_seconds)?;

        steps.push(SimulationStep {
            trial,
            protocol_id: decision.protocol.id,
            phase: decision.trace.phase,
            delta,
            standings,
            drift_resets: decision.trace.drift_resets.len(),
        });
        clock.advance(scenario.step_ms);
    }

    debug!(scenario = %scenario.name, seed, steps = steps.len(), "Simulation finished");
    Ok(SimulationReport {
        scenario: scenario.name.clone(),
        seed,
        steps,
    })
}
