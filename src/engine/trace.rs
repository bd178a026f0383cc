//! Structured provenance returned with every decision.

use super::phases::Phase;
use crate::config::DriftResetMode;
use crate::inference::ensemble::EnsembleResult;
use crate::inference::exploration::{ExplorationAdvice, ExplorationBudget};
use crate::inference::transfer::TransferPrior;
use crate::types::Goal;
use serde::Serialize;

/// Score a candidate received in the deciding phase.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CandidateScore {
    pub protocol_id: String,
    pub trials: u32,
    pub mean: f64,
    /// Present when the phase scored candidates (standard and close competition).
    pub score: Option<f64>,
}

/// A reset performed by the drift sweep.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DriftReset {
    pub protocol_id: String,
    pub variance: f64,
    pub mode: DriftResetMode,
    pub trials_before: u32,
}

/// Everything that went into one decision.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DecisionTrace {
    pub goal: Goal,
    pub timestamp_ms: i64,
    pub hour: u8,
    /// Phase that produced the selection.
    pub phase: Option<Phase>,
    /// Phases evaluated, in order, up to and including the deciding one.
    pub phases_evaluated: Vec<Phase>,
    pub candidates: usize,
    pub scores: Vec<CandidateScore>,
    pub drift_resets: Vec<DriftReset>,
    pub ensemble: Option<EnsembleResult>,
    pub exploration_budget: Option<ExplorationBudget>,
    pub exploration: Option<ExplorationAdvice>,
    /// Prior borrowed when the selected protocol's posterior was created.
    pub transfer: Option<TransferPrior>,
    pub reason: String,
}

impl DecisionTrace {
    pub fn new(goal: Goal, timestamp_ms: i64, hour: u8) -> Self {
        Self {
            goal,
            timestamp_ms,
            hour,
            phase: None,
            phases_evaluated: Vec::new(),
            candidates: 0,
            scores: Vec::new(),
            drift_resets: Vec::new(),
            ensemble: None,
            exploration_budget: None,
            exploration: None,
            transfer: None,
            reason: String::new(),
        }
    }

    pub fn decided_by(&self, phase: Phase) -> bool {
        self.phase == Some(phase)
    }
}
