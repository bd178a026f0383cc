//! Ensemble arbitration for close calls.
//!
//! When the two leading protocols are statistically indistinguishable a
//! single Thompson draw is close to a coin flip. Four independent strategies
//! vote instead, each with a confidence, and the votes are combined by a
//! fixed weight set.

use crate::config::EnsembleConfig;
use crate::inference::beta::BetaParams;
use rand::{Rng, RngCore};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Posterior snapshot of one candidate.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArmSnapshot {
    pub protocol_id: String,
    pub params: BetaParams,
    pub trials: u32,
}

impl ArmSnapshot {
    pub fn new(protocol_id: impl Into<String>, params: BetaParams, trials: u32) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            params,
            trials,
        }
    }
}

/// One strategy's pick.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StrategyVote {
    pub strategy: &'static str,
    pub protocol_id: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// A selection policy that can take part in the ensemble.
pub trait SelectionStrategy {
    fn name(&self) -> &'static str;

    /// Pick one arm. `None` only when `arms` is empty.
    fn vote(&self, arms: &[ArmSnapshot], total_trials: u64, rng: &mut dyn RngCore) -> Option<StrategyVote>;
}

fn argmax_by<F>(arms: &[ArmSnapshot], mut score: F) -> Option<(usize, f64)>
where
    F: FnMut(&ArmSnapshot) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, arm) in arms.iter().enumerate() {
        let s = score(arm);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    best
}

/// Highest posterior sample wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThompsonStrategy;

impl SelectionStrategy for ThompsonStrategy {
    fn name(&self) -> &'static str {
        "thompson"
    }

    fn vote(&self, arms: &[ArmSnapshot], _total_trials: u64, rng: &mut dyn RngCore) -> Option<StrategyVote> {
        let samples: Vec<f64> = arms.iter().map(|a| a.params.sample(&mut *rng)).collect();
        let (winner, best) = samples
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, s)| match best {
                Some((_, b)) if s <= b => best,
                _ => Some((i, s)),
            })?;

        let second = samples
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != winner)
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let gap = if second.is_finite() { best - second } else { 1.0 };
        let arm = &arms[winner];
        let confidence = (2.0 * gap).min(1.0) * (1.0 - arm.params.std_dev());

        Some(StrategyVote {
            strategy: self.name(),
            protocol_id: arm.protocol_id.clone(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: format!("thompson sampled {:.3} (gap {:.3})", best, gap),
        })
    }
}

/// Optimism under uncertainty.
#[derive(Debug, Default, Clone, Copy)]
pub struct UcbStrategy;

impl SelectionStrategy for UcbStrategy {
    fn name(&self) -> &'static str {
        "ucb"
    }

    fn vote(&self, arms: &[ArmSnapshot], total_trials: u64, _rng: &mut dyn RngCore) -> Option<StrategyVote> {
        let log_total = ((total_trials as f64) + 1.0).ln();
        let exploration =
            |arm: &ArmSnapshot| (2.0 * log_total / (f64::from(arm.trials) + 1.0)).sqrt();

        let (winner, score) =
            argmax_by(arms, |a| a.params.mean() + exploration(a) + a.params.std_dev())?;
        let arm = &arms[winner];
        let mean = arm.params.mean();
        let bonus = exploration(arm);
        let confidence = if mean + bonus > 0.0 {
            mean / (mean + bonus)
        } else {
            0.0
        };

        Some(StrategyVote {
            strategy: self.name(),
            protocol_id: arm.protocol_id.clone(),
            confidence,
            reasoning: format!("ucb score {:.3} (mean {:.3}, bonus {:.3})", score, mean, bonus),
        })
    }
}

/// Mostly greedy, with a decaying chance of a random pick.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpsilonGreedyStrategy;

impl EpsilonGreedyStrategy {
    pub fn epsilon(total_trials: u64) -> f64 {
        (0.2 * (-(total_trials as f64) / 30.0).exp()).max(0.05)
    }
}

impl SelectionStrategy for EpsilonGreedyStrategy {
    fn name(&self) -> &'static str {
        "epsilon_greedy"
    }

    fn vote(&self, arms: &[ArmSnapshot], total_trials: u64, rng: &mut dyn RngCore) -> Option<StrategyVote> {
        if arms.is_empty() {
            return None;
        }

        let epsilon = Self::epsilon(total_trials);
        if rng.gen::<f64>() < epsilon {
            let arm = &arms[rng.gen_range(0..arms.len())];
            return Some(StrategyVote {
                strategy: self.name(),
                protocol_id: arm.protocol_id.clone(),
                confidence: 0.3,
                reasoning: format!("epsilon-greedy explored at random (epsilon {:.3})", epsilon),
            });
        }

        let (winner, mean) = argmax_by(arms, |a| a.params.mean())?;
        let arm = &arms[winner];
        Some(StrategyVote {
            strategy: self.name(),
            protocol_id: arm.protocol_id.clone(),
            confidence: 1.0 - arm.params.std_dev(),
            reasoning: format!("epsilon-greedy exploited best mean {:.3}", mean),
        })
    }
}

/// Boltzmann draw over posterior means with a cooling temperature.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftmaxStrategy;

impl SoftmaxStrategy {
    pub fn temperature(total_trials: u64) -> f64 {
        (-(total_trials as f64) / 40.0).exp().max(0.1)
    }
}

impl SelectionStrategy for SoftmaxStrategy {
    fn name(&self) -> &'static str {
        "softmax"
    }

    fn vote(&self, arms: &[ArmSnapshot], total_trials: u64, rng: &mut dyn RngCore) -> Option<StrategyVote> {
        if arms.is_empty() {
            return None;
        }

        let temperature = Self::temperature(total_trials);
        let means: Vec<f64> = arms.iter().map(|a| a.params.mean()).collect();
        let max_mean = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // Shifted by the max for stability; probabilities are unchanged.
        let weights: Vec<f64> = means
            .iter()
            .map(|m| ((m - max_mean) / temperature).exp())
            .collect();
        let total: f64 = weights.iter().sum();

        let mut draw = rng.gen::<f64>() * total;
        let mut chosen = arms.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if draw < *w {
                chosen = i;
                break;
            }
            draw -= w;
        }

        let probability = weights[chosen] / total;
        Some(StrategyVote {
            strategy: self.name(),
            protocol_id: arms[chosen].protocol_id.clone(),
            confidence: probability,
            reasoning: format!(
                "softmax drew with probability {:.3} (temperature {:.3})",
                probability, temperature
            ),
        })
    }
}

/// Combined outcome of the ensemble.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnsembleResult {
    pub winner: String,
    /// Fraction of strategies that picked the winner.
    pub consensus_score: f64,
    pub weighted_scores: BTreeMap<String, f64>,
    pub votes: Vec<StrategyVote>,
    pub explanation: String,
}

/// Weighted-vote ensemble of selection strategies.
pub struct EnsembleArbitrator {
    strategies: Vec<(Box<dyn SelectionStrategy>, f64)>,
}

impl Default for EnsembleArbitrator {
    fn default() -> Self {
        Self::new(&EnsembleConfig::default())
    }
}

impl EnsembleArbitrator {
    /// The four standard strategies with configured weights.
    pub fn new(config: &EnsembleConfig) -> Self {
        Self::with_strategies(vec![
            (Box::new(ThompsonStrategy), config.thompson_weight),
            (Box::new(UcbStrategy), config.ucb_weight),
            (Box::new(EpsilonGreedyStrategy), config.epsilon_greedy_weight),
            (Box::new(SoftmaxStrategy), config.softmax_weight),
        ])
    }

    pub fn with_strategies(strategies: Vec<(Box<dyn SelectionStrategy>, f64)>) -> Self {
        Self { strategies }
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Run every strategy and combine their weighted confidences.
    pub fn decide(
        &self,
        arms: &[ArmSnapshot],
        total_trials: u64,
        rng: &mut dyn RngCore,
    ) -> Option<EnsembleResult> {
        if arms.is_empty() || self.strategies.is_empty() {
            return None;
        }

        let mut votes = Vec::with_capacity(self.strategies.len());
        let mut weighted_scores: BTreeMap<String, f64> = arms
            .iter()
            .map(|a| (a.protocol_id.clone(), 0.0))
            .collect();

        for (strategy, weight) in &self.strategies {
            if let Some(vote) = strategy.vote(arms, total_trials, rng) {
                *weighted_scores.entry(vote.protocol_id.clone()).or_insert(0.0) +=
                    weight * vote.confidence;
                votes.push(vote);
            }
        }

        // Ties resolve to candidate order.
        let mut winner: Option<(&str, f64)> = None;
        for arm in arms {
            let score = weighted_scores
                .get(&arm.protocol_id)
                .copied()
                .unwrap_or(0.0);
            if winner.map_or(true, |(_, best)| score > best) {
                winner = Some((&arm.protocol_id, score));
            }
        }
        let (winner, _) = winner?;
        let winner = winner.to_string();

        let agreeing: Vec<&StrategyVote> = votes.iter().filter(|v| v.protocol_id == winner).collect();
        let consensus_score = agreeing.len() as f64 / self.strategies.len() as f64;

        let reasons: Vec<&str> = agreeing.iter().map(|v| v.reasoning.as_str()).collect();
        let explanation = if reasons.is_empty() {
            format!("{} won on combined weight with no outright votes", winner)
        } else {
            format!(
                "{} chosen by {}/{} strategies: {}",
                winner,
                agreeing.len(),
                self.strategies.len(),
                reasons.join("; ")
            )
        };

        debug!(
            winner = %winner,
            consensus = consensus_score,
            "Ensemble arbitration complete"
        );

        Some(EnsembleResult {
            winner,
            consensus_score,
            weighted_scores,
            votes,
            explanation,
        })
    }
}
