//! Exploration budget and expected value of perfect information.
//!
//! The budget is recomputed from the total trial count on every decision
//! and never persisted. Its verdict is advisory: the orchestrator records it
//! in the decision trace, but the phase thresholds decide the pick.

use crate::config::ExplorationConfig;
use crate::inference::beta::BetaParams;
use serde::Serialize;

/// Margin around the current best mean inside which an arm is ambiguous.
const DOMINANCE_MARGIN: f64 = 0.05;

/// Session-scoped exploration quota.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ExplorationBudget {
    pub total_budget: f64,
    pub spent: f64,
    pub per_item_limit: f64,
}

impl ExplorationBudget {
    /// Budget decaying exponentially with the trials recorded so far.
    pub fn initialize(total_trials: u64, config: &ExplorationConfig) -> Self {
        let decayed = config.base_budget * (-(total_trials as f64) / config.decay_trials).exp();
        Self {
            total_budget: decayed.max(config.min_budget),
            spent: 0.0,
            per_item_limit: (decayed / 5.0).max(config.min_per_item_limit),
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.total_budget - self.spent).max(0.0)
    }
}

/// Value of learning an arm's true rate relative to the current best mean.
pub fn evpi(params: BetaParams, current_best_mean: f64) -> f64 {
    let (lower, upper) = params.credible_interval_95();

    if upper < current_best_mean - DOMINANCE_MARGIN {
        return 0.0;
    }
    if lower > current_best_mean + DOMINANCE_MARGIN {
        return (lower - current_best_mean) * 10.0;
    }
    (params.mean() - current_best_mean).max(0.0) + params.std_dev() * 5.0
}

/// Relative drop in posterior standard deviation after one observation at
/// the expected reward.
pub fn uncertainty_reduction(params: BetaParams) -> f64 {
    let before = params.std_dev();
    if before <= 0.0 {
        return 0.0;
    }
    let after = params.updated(params.mean()).std_dev();
    ((before - after) / before).max(0.0)
}

/// Advisory verdict for one arm.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExplorationAdvice {
    pub protocol_id: String,
    pub explore: bool,
    pub reason: String,
    pub evpi: f64,
    pub cost: f64,
    pub uncertainty_reduction: f64,
    pub opportunity_cost: f64,
    pub regret_bound: f64,
}

/// Decide whether exploring the arm is worth its cost under the budget.
pub fn should_explore(
    protocol_id: &str,
    params: BetaParams,
    trials: u32,
    current_best_mean: f64,
    budget: &ExplorationBudget,
    config: &ExplorationConfig,
) -> ExplorationAdvice {
    let cost = (f64::from(trials) + 1.0).sqrt();
    let value = evpi(params, current_best_mean);
    let reduction = uncertainty_reduction(params);
    let opportunity_cost = (current_best_mean - params.mean()).max(0.0);
    let regret_bound = if budget.total_budget > 0.0 {
        opportunity_cost * cost / budget.total_budget
    } else {
        opportunity_cost
    };

    let (explore, reason) = if budget.spent + cost > budget.total_budget {
        (
            false,
            format!(
                "budget exhausted ({:.1} spent + {:.2} cost > {:.1})",
                budget.spent, cost, budget.total_budget
            ),
        )
    } else if f64::from(trials) > budget.per_item_limit {
        (
            false,
            format!(
                "per-item limit reached ({} trials > {:.1})",
                trials, budget.per_item_limit
            ),
        )
    } else if value > config.evpi_threshold {
        (true, format!("high information value (EVPI {:.3})", value))
    } else if reduction > 0.1 && opportunity_cost < 0.2 {
        (
            true,
            format!(
                "uncertainty reduction {:.3} at low opportunity cost {:.3}",
                reduction, opportunity_cost
            ),
        )
    } else if regret_bound < 0.1 && trials < 3 {
        (true, format!("low regret bound {:.3} with few trials", regret_bound))
    } else {
        (false, format!("exploration not justified (EVPI {:.3})", value))
    };

    ExplorationAdvice {
        protocol_id: protocol_id.to_string(),
        explore,
        reason,
        evpi: value,
        cost,
        uncertainty_reduction: reduction,
        opportunity_cost,
        regret_bound,
    }
}
