//! Three-level hierarchical pooling: global → goal → item-under-goal.
//!
//! Two halves live here:
//!
//! - [`HierarchicalModel`] is persisted and updated online. Every
//!   item-goal update propagates a damped update to its goal (weight 0.05)
//!   and a further damped one to the global level (weight 0.02), so higher
//!   levels move monotonically more slowly.
//! - [`build_hierarchical_model`] fits method-of-moments hyperpriors from the
//!   current item-goal means and derives shrunken *effective* priors. Those
//!   are used for scoring and recommendations only and never written back
//!   into an item's own posterior.
//!
//! Shrinkage is intentionally unclamped: with high pooled variance it can
//! exceed 1, pulling sparse items past their parent. Blended shape
//! parameters are floored at [`MIN_SHAPE`] so the result is still a valid
//! Beta.

use crate::config::HierarchyConfig;
use crate::inference::beta::{BetaParams, MIN_SHAPE};
use crate::types::{Goal, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Shape parameters of one pooled level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LevelParams {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for LevelParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

/// Goal-level pooled parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GoalLevel {
    pub alpha: f64,
    pub beta: f64,
    pub item_count: u32,
}

impl Default for GoalLevel {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            item_count: 0,
        }
    }
}

/// Posterior of one item under one goal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ItemGoalLevel {
    pub alpha: f64,
    pub beta: f64,
    pub trials: u32,
}

impl ItemGoalLevel {
    pub fn params(&self) -> BetaParams {
        BetaParams::new(self.alpha, self.beta)
    }
}

/// Persisted three-level model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HierarchicalModel {
    pub global: LevelParams,
    pub per_goal: BTreeMap<Goal, GoalLevel>,
    /// Keyed `"<protocolId>:<goal>"`.
    pub per_item_goal: BTreeMap<String, ItemGoalLevel>,
}

/// Key of an item-goal entry.
pub fn item_goal_key(protocol_id: &str, goal: Goal) -> String {
    format!("{}:{}", protocol_id, goal)
}

impl HierarchicalModel {
    /// Record one reward for an item under a goal and propagate upwards.
    pub fn record(
        &mut self,
        protocol_id: &str,
        goal: Goal,
        reward: f64,
        prior: BetaParams,
        config: &HierarchyConfig,
    ) {
        let reward = reward.clamp(0.0, 1.0);
        let key = item_goal_key(protocol_id, goal);

        let entry = self
            .per_item_goal
            .entry(key)
            .or_insert_with(|| ItemGoalLevel {
                alpha: prior.alpha,
                beta: prior.beta,
                trials: 0,
            });
        entry.alpha += reward;
        entry.beta += 1.0 - reward;
        entry.trials += 1;

        let suffix = format!(":{}", goal);
        let item_count = self
            .per_item_goal
            .keys()
            .filter(|k| k.ends_with(&suffix))
            .count() as u32;

        let level = self.per_goal.entry(goal).or_default();
        level.alpha += config.goal_rate * reward;
        level.beta += config.goal_rate * (1.0 - reward);
        level.item_count = item_count;

        self.global.alpha += config.global_rate * reward;
        self.global.beta += config.global_rate * (1.0 - reward);
    }

    pub fn item_goal(&self, protocol_id: &str, goal: Goal) -> Option<&ItemGoalLevel> {
        self.per_item_goal.get(&item_goal_key(protocol_id, goal))
    }
}

/// Method-of-moments hyperprior.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct HyperPrior {
    pub mu: f64,
    pub kappa: f64,
    pub alpha0: f64,
    pub beta0: f64,
    pub effective_sample_size: f64,
}

impl HyperPrior {
    /// Weak prior used when there are no observations.
    pub fn weak() -> Self {
        Self {
            mu: 0.5,
            kappa: 2.0,
            alpha0: 1.5,
            beta0: 1.5,
            effective_sample_size: 3.0,
        }
    }

    pub fn params(&self) -> BetaParams {
        BetaParams::new(self.alpha0, self.beta0)
    }
}

fn mean_and_variance(observations: &[f64]) -> (f64, f64) {
    let n = observations.len() as f64;
    let mean = observations.iter().sum::<f64>() / n;
    let variance = observations.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Population variance of a set of means, 0 when fewer than two.
pub fn pooled_variance(observations: &[f64]) -> f64 {
    if observations.len() < 2 {
        return 0.0;
    }
    mean_and_variance(observations).1
}

/// Fit a hyperprior to observed means.
///
/// Degenerate variance (a single observation, or identical ones) leaves the
/// concentration at its floor of 2 rather than dividing by zero.
pub fn initialize_hyper_prior(observations: &[f64]) -> HyperPrior {
    if observations.is_empty() {
        return HyperPrior::weak();
    }

    let (mu, variance) = mean_and_variance(observations);
    let mu = mu.clamp(0.0, 1.0);
    let kappa = if variance > f64::EPSILON {
        (mu * (1.0 - mu) / variance - 1.0).max(2.0)
    } else {
        2.0
    };

    let alpha0 = (mu * kappa).max(MIN_SHAPE);
    let beta0 = ((1.0 - mu) * kappa).max(MIN_SHAPE);

    HyperPrior {
        mu,
        kappa,
        alpha0,
        beta0,
        effective_sample_size: alpha0 + beta0,
    }
}

/// Degree to which an item is pulled toward its parent.
///
/// May exceed 1 when pooled variance is high.
pub fn calculate_shrinkage(trials: u32, parent_ess: f64, pooled_variance: f64) -> f64 {
    let trials = f64::from(trials);
    let denominator = trials + parent_ess.max(0.0);
    let trial_weight = if denominator > 0.0 {
        trials / denominator
    } else {
        1.0
    };
    let variance_penalty = (pooled_variance.max(0.0) * 2.0).min(1.0);
    (1.0 - trial_weight) * (1.0 + variance_penalty)
}

/// Effective prior of one item under one goal.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct HierarchicalPrior {
    pub effective: BetaParams,
    pub shrinkage: f64,
    pub trials: u32,
    pub parent_mean: f64,
}

/// Blend an item's posterior with its parent hyperprior by shrinkage.
pub fn hierarchical_prior(
    item: BetaParams,
    trials: u32,
    parent: &HyperPrior,
    pooled_variance: f64,
) -> HierarchicalPrior {
    let shrinkage = calculate_shrinkage(trials, parent.effective_sample_size, pooled_variance);
    let alpha = ((1.0 - shrinkage) * item.alpha + shrinkage * parent.alpha0).max(MIN_SHAPE);
    let beta = ((1.0 - shrinkage) * item.beta + shrinkage * parent.beta0).max(MIN_SHAPE);

    HierarchicalPrior {
        effective: BetaParams::new(alpha, beta),
        shrinkage,
        trials,
        parent_mean: parent.mu,
    }
}

/// Fitted goal level.
#[derive(Debug, Clone, Serialize)]
pub struct GoalPrior {
    pub hyper: HyperPrior,
    pub variance: f64,
    pub observations: usize,
    /// True when no item under the goal had data and the global fit was used.
    pub borrowed_from_global: bool,
}

/// Output of [`build_hierarchical_model`].
#[derive(Debug, Clone, Serialize)]
pub struct HierarchicalPriors {
    pub global: HyperPrior,
    pub global_variance: f64,
    pub goals: BTreeMap<Goal, GoalPrior>,
    /// Keyed like [`HierarchicalModel::per_item_goal`].
    pub items: BTreeMap<String, HierarchicalPrior>,
}

impl HierarchicalPriors {
    pub fn item(&self, protocol_id: &str, goal: Goal) -> Option<&HierarchicalPrior> {
        self.items.get(&item_goal_key(protocol_id, goal))
    }
}

/// Fit hyperpriors for every level and compute effective priors for every
/// (protocol, supported goal) pair in the catalog.
pub fn build_hierarchical_model(
    protocols: &[Protocol],
    model: &HierarchicalModel,
    default_prior: BetaParams,
) -> HierarchicalPriors {
    let observed_mean = |entry: &ItemGoalLevel| entry.params().mean();

    let global_obs: Vec<f64> = model
        .per_item_goal
        .values()
        .filter(|e| e.trials >= 1)
        .map(observed_mean)
        .collect();
    let global = initialize_hyper_prior(&global_obs);
    let global_variance = pooled_variance(&global_obs);

    let mut goals = BTreeMap::new();
    let mut items = BTreeMap::new();

    for goal in Goal::ALL {
        let members: Vec<&Protocol> = protocols.iter().filter(|p| p.supports(goal)).collect();

        let goal_obs: Vec<f64> = members
            .iter()
            .filter_map(|p| model.item_goal(&p.id, goal))
            .filter(|e| e.trials >= 1)
            .map(observed_mean)
            .collect();

        let goal_prior = if goal_obs.is_empty() {
            GoalPrior {
                hyper: global,
                variance: global_variance,
                observations: 0,
                borrowed_from_global: true,
            }
        } else {
            GoalPrior {
                hyper: initialize_hyper_prior(&goal_obs),
                variance: pooled_variance(&goal_obs),
                observations: goal_obs.len(),
                borrowed_from_global: false,
            }
        };

        for protocol in members {
            let (params, trials) = match model.item_goal(&protocol.id, goal) {
                Some(entry) => (entry.params(), entry.trials),
                None => (default_prior, 0),
            };
            let prior = hierarchical_prior(params, trials, &goal_prior.hyper, goal_prior.variance);
            items.insert(item_goal_key(&protocol.id, goal), prior);
        }

        goals.insert(goal, goal_prior);
    }

    debug!(
        global_observations = global_obs.len(),
        items = items.len(),
        "Built hierarchical priors"
    );

    HierarchicalPriors {
        global,
        global_variance,
        goals,
        items,
    }
}

/// Four-tier classification of how much the hierarchy has to work with.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataSufficiency {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl fmt::Display for DataSufficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DataSufficiency::Excellent => "excellent",
            DataSufficiency::Good => "good",
            DataSufficiency::Fair => "fair",
            DataSufficiency::Poor => "poor",
        };
        f.write_str(label)
    }
}

/// Health report of the hierarchical model.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchicalDiagnostics {
    pub total_pairs: usize,
    pub pairs_with_data: usize,
    pub coverage: f64,
    pub avg_shrinkage: f64,
    pub total_observations: u64,
    pub data_sufficiency: DataSufficiency,
    pub recommendations: Vec<String>,
}

/// Summarise coverage and shrinkage of a fitted model.
pub fn diagnose_hierarchical_model(priors: &HierarchicalPriors) -> HierarchicalDiagnostics {
    let total_pairs = priors.items.len();
    let pairs_with_data = priors.items.values().filter(|p| p.trials > 0).count();
    let total_observations: u64 = priors.items.values().map(|p| u64::from(p.trials)).sum();

    let coverage = if total_pairs > 0 {
        pairs_with_data as f64 / total_pairs as f64
    } else {
        0.0
    };
    let avg_shrinkage = if total_pairs > 0 {
        priors.items.values().map(|p| p.shrinkage).sum::<f64>() / total_pairs as f64
    } else {
        0.0
    };

    let data_sufficiency = if coverage >= 0.8 && avg_shrinkage < 0.3 {
        DataSufficiency::Excellent
    } else if coverage >= 0.6 && avg_shrinkage < 0.5 {
        DataSufficiency::Good
    } else if coverage >= 0.4 {
        DataSufficiency::Fair
    } else {
        DataSufficiency::Poor
    };

    let mut recommendations = Vec::new();
    if coverage < 0.5 {
        recommendations.push(format!(
            "Only {:.0}% of protocol-goal pairs have data; try more protocols under each goal",
            coverage * 100.0
        ));
    }
    if avg_shrinkage > 0.6 {
        recommendations.push(
            "Estimates lean heavily on pooled priors; individual protocols need more sessions"
                .to_string(),
        );
    }
    if total_observations < 20 {
        recommendations.push(format!(
            "{} sessions recorded; recommendations stabilise after about 20",
            total_observations
        ));
    }

    HierarchicalDiagnostics {
        total_pairs,
        pairs_with_data,
        coverage,
        avg_shrinkage,
        total_observations,
        data_sufficiency,
        recommendations,
    }
}
