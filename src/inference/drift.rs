//! Concentration-drift detection.
//!
//! A short window of raw feedback per item is monitored for variance. High
//! variance means the item's recent outcomes disagree with each other, which
//! is the cheapest available signal that its effectiveness has shifted. A
//! cooldown keeps a noisy item from being reset over and over.

use crate::config::DriftConfig;
use crate::inference::beta::BetaParams;
use std::collections::VecDeque;

/// Rolling-window drift monitor.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    window_size: usize,
    min_samples: usize,
    variance_threshold: f64,
    cooldown_ms: i64,
    keep_fraction: f64,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(&DriftConfig::default())
    }
}

impl DriftDetector {
    pub fn new(config: &DriftConfig) -> Self {
        Self {
            window_size: config.window_size,
            min_samples: config.min_samples,
            variance_threshold: config.variance_threshold,
            cooldown_ms: config.cooldown_ms,
            keep_fraction: config.keep_fraction,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append a raw score, evicting the oldest beyond the window size.
    pub fn push_score(&self, window: &mut VecDeque<f64>, score: f64) {
        window.push_back(score);
        while window.len() > self.window_size {
            window.pop_front();
        }
    }

    /// Population variance, 0 when fewer than `min_samples` are present.
    pub fn variance<'a, I>(&self, window: I) -> f64
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let values: Vec<f64> = window.into_iter().copied().collect();
        if values.len() < self.min_samples.max(1) {
            return 0.0;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }

    /// Reset gate: variance at or above threshold and outside the cooldown.
    pub fn should_reset(&self, variance: f64, last_reset_ms: Option<i64>, now_ms: i64) -> bool {
        if variance.is_nan() || variance < self.variance_threshold {
            return false;
        }

        match last_reset_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > self.cooldown_ms,
        }
    }

    /// Recentre on the pre-drift mean while keeping only a fraction of the
    /// accumulated evidence.
    pub fn soft_reset(&self, params: BetaParams) -> BetaParams {
        let total_prior_trials = (params.alpha + params.beta - 2.0).max(0.0);
        let mean = params.mean();
        let kept = (total_prior_trials * self.keep_fraction).floor();

        BetaParams::new(1.0 + mean * kept, 1.0 + (1.0 - mean) * kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_variance_needs_three_samples() {
        let detector = DriftDetector::default();
        assert_eq!(detector.variance(&[1.0, -1.0]), 0.0);
        // mean 1/3, deviations (2/3)^2 * 2 + (4/3)^2 = 24/9, / 3
        let v = detector.variance(&[1.0, 1.0, -1.0]);
        assert!((v - 8.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_push_score_bounds_window() {
        let detector = DriftDetector::default();
        let mut window = VecDeque::new();
        for i in 0..8 {
            detector.push_score(&mut window, i as f64);
        }
        assert_eq!(window.len(), 5);
        assert_eq!(window.front(), Some(&3.0));
    }

    #[test]
    fn test_should_reset_cooldown() {
        let detector = DriftDetector::default();
        let now = 10_000_000;

        assert!(detector.should_reset(0.5, None, now));
        assert!(!detector.should_reset(0.5, Some(now - 1_000), now));
        assert!(!detector.should_reset(0.5, Some(now - 3_600_000), now));
        assert!(detector.should_reset(0.5, Some(now - 3_600_001), now));
        assert!(!detector.should_reset(0.29, None, now));
        assert!(detector.should_reset(0.30, None, now));
    }

    #[test]
    fn test_soft_reset_example() {
        let detector = DriftDetector::default();
        let reset = detector.soft_reset(BetaParams::new(17.0, 5.0));
        // 20 prior trials, keep 5 around mean 17/22
        let mean = 17.0 / 22.0;
        assert!((reset.alpha - (1.0 + mean * 5.0)).abs() < 1e-12);
        assert!((reset.beta - (1.0 + (1.0 - mean) * 5.0)).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_low_variance_never_resets(
            variance in 0.0f64..0.2999,
            last in proptest::option::of(0i64..1_000_000_000),
            now in 0i64..2_000_000_000,
        ) {
            let detector = DriftDetector::default();
            prop_assert!(!detector.should_reset(variance, last, now));
        }

        #[test]
        fn prop_high_variance_resets_outside_cooldown(
            variance in 0.30f64..2.0,
            last in 0i64..1_000_000_000,
            elapsed in 3_600_001i64..100_000_000,
        ) {
            let detector = DriftDetector::default();
            prop_assert!(detector.should_reset(variance, None, last));
            prop_assert!(detector.should_reset(variance, Some(last), last + elapsed));
            prop_assert!(!detector.should_reset(variance, Some(last), last + 3_600_000));
        }

        #[test]
        fn prop_soft_reset_shrinks_confidence_and_keeps_mean(
            alpha in 2.0f64..400.0,
            beta in 2.0f64..400.0,
        ) {
            let detector = DriftDetector::default();
            let before = BetaParams::new(alpha, beta);
            let after = detector.soft_reset(before);
            prop_assert!(after.alpha + after.beta < before.alpha + before.beta);

            // Recentred on 1 + mean*kept: the mean is pulled only by the unit prior.
            let kept = ((alpha + beta - 2.0) * 0.25).floor();
            if kept >= 20.0 {
                prop_assert!((after.mean() - before.mean()).abs() < 0.05);
            }
        }
    }
}
