//! Read-only reports over the learning state.
//!
//! Nothing here mutates posteriors; the engine loads state, computes a
//! report and discards the state without saving.

use crate::config::EngineConfig;
use crate::inference::beta::BetaParams;
use crate::inference::contextual::best_hour;
use crate::inference::exploration::ExplorationBudget;
use crate::inference::hierarchical::{
    build_hierarchical_model, diagnose_hierarchical_model, HierarchicalDiagnostics,
};
use crate::state::AppState;
use crate::types::{FeedbackDelta, Goal, Protocol};
use serde::Serialize;
use std::collections::BTreeMap;

/// Best-performing protocol for a goal.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BestProtocol {
    pub protocol_id: String,
    pub name: String,
    pub mean: f64,
    pub trials: u32,
}

/// Usage summary over the whole history.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InsightSummary {
    pub total_sessions: usize,
    pub sessions_by_goal: BTreeMap<Goal, usize>,
    pub average_delta: f64,
    /// Share of sessions rated "better".
    pub improvement_rate: f64,
    pub best_by_goal: BTreeMap<Goal, BestProtocol>,
    pub current_streak: u32,
    pub average_dose_secs: Option<f64>,
    pub total_minutes: f64,
}

/// Result of [`insights`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Insights {
    NoData,
    Summary(InsightSummary),
}

pub fn insights(state: &AppState, protocols: &[Protocol]) -> Insights {
    let history = &state.session_history;
    if history.is_empty() {
        return Insights::NoData;
    }

    let total = history.len();
    let mut sessions_by_goal = BTreeMap::new();
    for record in history {
        *sessions_by_goal.entry(record.goal).or_insert(0) += 1;
    }

    let average_delta = history.iter().map(|r| r.delta.as_f64()).sum::<f64>() / total as f64;
    let improvement_rate = history
        .iter()
        .filter(|r| r.delta == FeedbackDelta::Better)
        .count() as f64
        / total as f64;
    let total_minutes = history.iter().map(|r| r.duration_secs).sum::<f64>() / 60.0;

    let mut best_by_goal = BTreeMap::new();
    for goal in Goal::ALL {
        let best = protocols
            .iter()
            .filter(|p| p.supports(goal))
            .filter_map(|p| {
                state
                    .posterior(&p.id)
                    .filter(|post| post.trials > 0)
                    .map(|post| BestProtocol {
                        protocol_id: p.id.clone(),
                        name: p.name.clone(),
                        mean: post.mean(),
                        trials: post.trials,
                    })
            })
            .max_by(|a, b| a.mean.partial_cmp(&b.mean).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(best) = best {
            best_by_goal.insert(goal, best);
        }
    }

    let doses: Vec<f64> = state
        .posteriors
        .values()
        .filter(|p| p.trials > 0)
        .map(|p| p.dose_seconds)
        .collect();
    let average_dose_secs = if doses.is_empty() {
        None
    } else {
        Some(doses.iter().sum::<f64>() / doses.len() as f64)
    };

    Insights::Summary(InsightSummary {
        total_sessions: total,
        sessions_by_goal,
        average_delta,
        improvement_rate,
        best_by_goal,
        current_streak: state.current_streak,
        average_dose_secs,
        total_minutes,
    })
}

/// Posterior statistics for one protocol.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProtocolMetrics {
    pub protocol_id: String,
    pub name: String,
    pub trials: u32,
    pub mean: f64,
    pub variance: f64,
    pub credible_interval: (f64, f64),
    pub dose_seconds: f64,
    pub running_average: f64,
    pub ema_average: f64,
    pub recent_variance: f64,
    pub reset_count: u32,
    pub hourly_models: usize,
    pub best_hour: Option<u8>,
}

/// Summary of the transfer knowledge base.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransferSummary {
    pub registered_protocols: usize,
    pub history_len: usize,
    pub mean_similarity: Option<f64>,
}

/// Internal state of every learner.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmMetrics {
    pub total_trials: u64,
    pub protocols: Vec<ProtocolMetrics>,
    pub exploration_budget: ExplorationBudget,
    pub hierarchy: HierarchicalDiagnostics,
    pub transfer: TransferSummary,
}

pub fn algorithm_metrics(state: &AppState, protocols: &[Protocol], config: &EngineConfig) -> AlgorithmMetrics {
    let prior = BetaParams::new(config.prior.alpha, config.prior.beta);

    let metrics = protocols
        .iter()
        .map(|p| match state.posterior(&p.id) {
            Some(post) => ProtocolMetrics {
                protocol_id: p.id.clone(),
                name: p.name.clone(),
                trials: post.trials,
                mean: post.mean(),
                variance: post.variance(),
                credible_interval: post.params().credible_interval_95(),
                dose_seconds: post.dose_seconds,
                running_average: post.running_average,
                ema_average: post.ema_average,
                recent_variance: post.recent_variance,
                reset_count: post.reset_count,
                hourly_models: post.hourly.len(),
                best_hour: best_hour(post).map(|(hour, _)| hour),
            },
            None => ProtocolMetrics {
                protocol_id: p.id.clone(),
                name: p.name.clone(),
                trials: 0,
                mean: prior.mean(),
                variance: prior.variance(),
                credible_interval: prior.credible_interval_95(),
                dose_seconds: p.base_duration(),
                running_average: 0.0,
                ema_average: 0.0,
                recent_variance: 0.0,
                reset_count: 0,
                hourly_models: 0,
                best_hour: None,
            },
        })
        .collect();

    let total_trials = state.total_trials();
    let priors = build_hierarchical_model(protocols, &state.hierarchy, prior);

    let knowledge = &state.knowledge;
    let off_diagonal: Vec<f64> = knowledge
        .similarity_matrix
        .iter()
        .flat_map(|(a, row)| row.iter().filter(move |(b, _)| *b != a).map(|(_, v)| *v))
        .collect();
    let mean_similarity = if off_diagonal.is_empty() {
        None
    } else {
        Some(off_diagonal.iter().sum::<f64>() / off_diagonal.len() as f64)
    };

    AlgorithmMetrics {
        total_trials,
        protocols: metrics,
        exploration_budget: ExplorationBudget::initialize(total_trials, &config.exploration),
        hierarchy: diagnose_hierarchical_model(&priors),
        transfer: TransferSummary {
            registered_protocols: knowledge.item_features.len(),
            history_len: knowledge.performance_history.len(),
            mean_similarity,
        },
    }
}

/// A ranked protocol for a goal.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Recommendation {
    pub protocol_id: String,
    pub name: String,
    /// Mean of the hierarchical effective prior.
    pub score: f64,
    pub credible_interval: (f64, f64),
    pub trials: u32,
    pub shrinkage: Option<f64>,
    pub dose_seconds: f64,
}

/// Protocols for `goal` ranked by their pooled estimate.
pub fn top_recommendations(
    state: &AppState,
    protocols: &[Protocol],
    goal: Goal,
    limit: usize,
    config: &EngineConfig,
) -> Vec<Recommendation> {
    let prior = BetaParams::new(config.prior.alpha, config.prior.beta);
    let priors = build_hierarchical_model(protocols, &state.hierarchy, prior);

    let mut ranked: Vec<Recommendation> = protocols
        .iter()
        .filter(|p| p.supports(goal))
        .map(|p| {
            let posterior = state.posterior(&p.id);
            let fallback = posterior.map(|post| post.params()).unwrap_or(prior);
            let (params, shrinkage) = match priors.item(&p.id, goal) {
                Some(h) => (h.effective, Some(h.shrinkage)),
                None => (fallback, None),
            };

            Recommendation {
                protocol_id: p.id.clone(),
                name: p.name.clone(),
                score: params.mean(),
                credible_interval: params.credible_interval_95(),
                trials: posterior.map(|post| post.trials).unwrap_or(0),
                shrinkage,
                dose_seconds: posterior
                    .map(|post| post.dose_seconds)
                    .unwrap_or_else(|| p.base_duration()),
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, StaticCatalog};
    use crate::config::EngineConfig;
    use crate::types::SessionRecord;
    use uuid::Uuid;

    #[test]
    fn test_insights_without_history() {
        let catalog = StaticCatalog::builtin();
        assert_eq!(insights(&AppState::default(), catalog.protocols()), Insights::NoData);
    }

    #[test]
    fn test_insights_summary() {
        let catalog = StaticCatalog::builtin();
        let mut state = AppState::default();
        for (i, delta) in [FeedbackDelta::Better, FeedbackDelta::Same, FeedbackDelta::Better, FeedbackDelta::Worse]
            .into_iter()
            .enumerate()
        {
            state.session_history.push(SessionRecord {
                id: Uuid::new_v4(),
                timestamp_ms: i as i64,
                goal: if i < 3 { Goal::Calm } else { Goal::Energy },
                protocol_id: "4-7-8".to_string(),
                duration_secs: 120.0,
                delta,
            });
        }

        let Insights::Summary(summary) = insights(&state, catalog.protocols()) else {
            panic!("expected a summary");
        };
        assert_eq!(summary.total_sessions, 4);
        assert_eq!(summary.sessions_by_goal[&Goal::Calm], 3);
        assert_eq!(summary.improvement_rate, 0.5);
        assert_eq!(summary.average_delta, 0.25);
        assert_eq!(summary.total_minutes, 8.0);
        assert!(summary.best_by_goal.is_empty());
        assert_eq!(summary.average_dose_secs, None);
    }

    #[test]
    fn test_metrics_cover_every_protocol() {
        let catalog = StaticCatalog::builtin();
        let config = EngineConfig::default();
        let metrics = algorithm_metrics(&AppState::default(), catalog.protocols(), &config);
        assert_eq!(metrics.protocols.len(), catalog.protocols().len());
        assert_eq!(metrics.total_trials, 0);
        assert_eq!(metrics.exploration_budget.total_budget, 100.0);
        assert!(metrics.protocols.iter().all(|p| (p.mean - 0.6).abs() < 1e-12));
    }

    #[test]
    fn test_recommendations_are_limited_and_goal_scoped() {
        let catalog = StaticCatalog::builtin();
        let config = EngineConfig::default();
        let recs = top_recommendations(&AppState::default(), catalog.protocols(), Goal::Calm, 3, &config);
        assert_eq!(recs.len(), 3);
        for rec in &recs {
            assert!(catalog.by_id(&rec.protocol_id).unwrap().supports(Goal::Calm));
            assert_eq!(rec.trials, 0);
        }
    }
}
