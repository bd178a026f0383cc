//! Engine configuration
//!
//! Every tunable constant of the decision policy lives here so that the
//! inference code never hard-codes a threshold. Defaults reproduce the
//! reference policy exactly; a TOML file and `KAIROS__SECTION__KEY`
//! environment variables can override individual values.
//!
//! ```toml
//! [selection]
//! close_competition_min_trials = 20
//!
//! [drift]
//! reset_mode = "soft"
//! ```

use crate::error::{KairosError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment prefix for overrides (`KAIROS__DRIFT__VARIANCE_THRESHOLD=0.4`)
pub const ENV_PREFIX: &str = "KAIROS";

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub prior: PriorConfig,
    pub selection: SelectionConfig,
    pub drift: DriftConfig,
    pub dose: DoseConfig,
    pub hierarchy: HierarchyConfig,
    pub transfer: TransferConfig,
    pub ensemble: EnsembleConfig,
    pub exploration: ExplorationConfig,
}

/// Default prior and averaging constants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriorConfig {
    /// Optimistic default prior alpha
    pub alpha: f64,
    /// Optimistic default prior beta
    pub beta: f64,
    /// EMA smoothing factor for raw feedback
    pub ema_smoothing: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            alpha: 1.5,
            beta: 1.0,
            ema_smoothing: 0.2,
        }
    }
}

/// Phase thresholds of the selection orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionConfig {
    /// Trials required before an item competes via Thompson sampling
    pub min_trials_for_thompson: u32,
    /// EMA below which an undertried item is treated as consistently harmful
    pub harmful_ema_threshold: f64,
    /// Minimum trials on both leaders before close competition is considered
    pub close_competition_min_trials: u32,
    /// Maximum gap between leader means that counts as a close call
    pub close_competition_margin: f64,
    /// Multiplier on the posterior standard deviation in the standard phase
    pub uncertainty_bonus: f64,
    /// Offset added to the uniform score of items with too few trials
    pub sparse_item_bonus: f64,
    /// Condition selection on hour of day (disabled in the reference policy)
    pub contextual_selection: bool,
    /// Per-hour trials forced when contextual selection is enabled
    pub min_hourly_exploration: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_trials_for_thompson: 2,
            harmful_ema_threshold: -0.3,
            close_competition_min_trials: 20,
            close_competition_margin: 0.05,
            uncertainty_bonus: 0.05,
            sparse_item_bonus: 0.05,
            contextual_selection: false,
            min_hourly_exploration: 2,
        }
    }
}

/// How the orchestrator resets a drifting item
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriftResetMode {
    /// Trials, alpha, beta and dose back to defaults
    #[default]
    Full,
    /// Keep a quarter of the evidence around the pre-drift mean
    Soft,
}

/// Drift detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriftConfig {
    pub window_size: usize,
    pub min_samples: usize,
    pub variance_threshold: f64,
    pub cooldown_ms: i64,
    pub keep_fraction: f64,
    pub reset_mode: DriftResetMode,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            min_samples: 3,
            variance_threshold: 0.30,
            cooldown_ms: 3_600_000,
            keep_fraction: 0.25,
            reset_mode: DriftResetMode::Full,
        }
    }
}

/// Minimum-effective-dose search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DoseConfig {
    pub min_secs: f64,
    pub max_secs: f64,
    /// Step when the recent outcomes are all "better"
    pub momentum_step: f64,
    /// Step when no momentum and no recent "worse"
    pub default_step: f64,
    /// Step when a recent outcome was "worse"
    pub recovery_step: f64,
}

impl Default for DoseConfig {
    fn default() -> Self {
        Self {
            min_secs: 45.0,
            max_secs: 180.0,
            momentum_step: 10.0,
            default_step: 15.0,
            recovery_step: 20.0,
        }
    }
}

/// Hierarchical pooling rates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HierarchyConfig {
    pub goal_rate: f64,
    pub global_rate: f64,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            goal_rate: 0.05,
            global_rate: 0.02,
        }
    }
}

/// Transfer-learning meta parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    pub learning_rate: f64,
    pub similarity_threshold: f64,
    pub transfer_strength: f64,
    pub max_neighbors: usize,
    /// Share of the transferred prior in the blend with the default prior
    pub transferred_share: f64,
    pub history_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            similarity_threshold: 0.6,
            transfer_strength: 0.4,
            max_neighbors: 3,
            transferred_share: 0.6,
            history_capacity: 100,
        }
    }
}

/// Voting weights of the ensemble arbitrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnsembleConfig {
    pub thompson_weight: f64,
    pub ucb_weight: f64,
    pub epsilon_greedy_weight: f64,
    pub softmax_weight: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            thompson_weight: 0.35,
            ucb_weight: 0.25,
            epsilon_greedy_weight: 0.25,
            softmax_weight: 0.15,
        }
    }
}

/// Exploration budget constants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExplorationConfig {
    pub base_budget: f64,
    pub decay_trials: f64,
    pub min_budget: f64,
    pub min_per_item_limit: f64,
    pub evpi_threshold: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            base_budget: 100.0,
            decay_trials: 50.0,
            min_budget: 10.0,
            min_per_item_limit: 3.0,
            evpi_threshold: 0.5,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file layered under
    /// `KAIROS__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading engine configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(toml_str)
            .map_err(|e| KairosError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML (used by `kairos config`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| KairosError::Other(format!("Failed to render config: {}", e)))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.prior.alpha <= 0.0 || self.prior.beta <= 0.0 {
            return Err(KairosError::InvalidConfig(
                "prior alpha and beta must be positive".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.prior.ema_smoothing) {
            return Err(KairosError::InvalidConfig(
                "prior.ema_smoothing must be within [0, 1]".to_string(),
            ));
        }

        if self.drift.window_size == 0 || self.drift.min_samples > self.drift.window_size {
            return Err(KairosError::InvalidConfig(format!(
                "drift.min_samples ({}) must not exceed a non-zero drift.window_size ({})",
                self.drift.min_samples, self.drift.window_size
            )));
        }

        if !(0.0..=1.0).contains(&self.drift.keep_fraction) {
            return Err(KairosError::InvalidConfig(
                "drift.keep_fraction must be within [0, 1]".to_string(),
            ));
        }

        if self.dose.min_secs <= 0.0 || self.dose.min_secs > self.dose.max_secs {
            return Err(KairosError::InvalidConfig(format!(
                "dose bounds invalid: min {} max {}",
                self.dose.min_secs, self.dose.max_secs
            )));
        }

        if !(0.0..=1.0).contains(&self.transfer.similarity_threshold)
            || !(0.0..=1.0).contains(&self.transfer.transferred_share)
        {
            return Err(KairosError::InvalidConfig(
                "transfer threshold and share must be within [0, 1]".to_string(),
            ));
        }

        let weights = [
            self.ensemble.thompson_weight,
            self.ensemble.ucb_weight,
            self.ensemble.epsilon_greedy_weight,
            self.ensemble.softmax_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(KairosError::InvalidConfig(
                "ensemble weights must be non-negative with a positive sum".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.prior.alpha, 1.5);
        assert_eq!(config.prior.beta, 1.0);
        assert_eq!(config.selection.min_trials_for_thompson, 2);
        assert_eq!(config.selection.close_competition_min_trials, 20);
        assert!(!config.selection.contextual_selection);
        assert_eq!(config.drift.cooldown_ms, 3_600_000);
        assert_eq!(config.drift.reset_mode, DriftResetMode::Full);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [drift]
            reset_mode = "soft"
            variance_threshold = 0.4
            "#,
        )
        .unwrap();

        assert_eq!(config.drift.reset_mode, DriftResetMode::Soft);
        assert_eq!(config.drift.variance_threshold, 0.4);
        assert_eq!(config.drift.window_size, 5);
        assert_eq!(config.dose.min_secs, 45.0);
    }

    #[test]
    fn test_validation_rejects_bad_dose_bounds() {
        let result = EngineConfig::from_toml(
            r#"
            [dose]
            min_secs = 200.0
            max_secs = 180.0
            "#,
        );
        assert!(matches!(result, Err(KairosError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed = EngineConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
