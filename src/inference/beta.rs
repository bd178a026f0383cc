//! Beta-Bernoulli primitives: moments, credible intervals, conjugate
//! updates and Gamma-ratio sampling.
//!
//! Sampling never reaches for an ambient generator. Every routine takes the
//! uniform source as `&mut R where R: Rng + ?Sized`, so callers can hand in a
//! seeded `StdRng`, a `dyn RngCore`, or a fully scripted generator.

use crate::types::FeedbackDelta;
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};

/// Smallest shape parameter accepted by the sampler. Anything below (or
/// non-finite) is lifted to this value instead of producing NaN.
pub const MIN_SHAPE: f64 = 0.01;

/// z-score of the two-sided 95% interval.
const Z_95: f64 = 1.96;

/// Beta(alpha, beta) belief about a success probability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaParams {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Uninformative Beta(1, 1).
    pub fn uniform() -> Self {
        Self::new(1.0, 1.0)
    }

    /// Parameters lifted into the valid domain.
    pub fn sanitized(&self) -> Self {
        Self::new(sanitize_shape(self.alpha), sanitize_shape(self.beta))
    }

    pub fn mean(&self) -> f64 {
        let p = self.sanitized();
        p.alpha / (p.alpha + p.beta)
    }

    pub fn variance(&self) -> f64 {
        let p = self.sanitized();
        let total = p.alpha + p.beta;
        (p.alpha * p.beta) / (total * total * (total + 1.0))
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 95% credible interval by normal approximation, clamped to [0, 1].
    ///
    /// Not the exact Beta quantiles; adequate for ranking and gating.
    pub fn credible_interval_95(&self) -> (f64, f64) {
        let mean = self.mean();
        let half_width = Z_95 * self.std_dev();
        ((mean - half_width).max(0.0), (mean + half_width).min(1.0))
    }

    /// Pseudo-observations beyond the uniform prior.
    pub fn evidence(&self) -> f64 {
        (self.alpha + self.beta - 2.0).max(0.0)
    }

    /// Draw one value from the distribution.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let p = self.sanitized();
        let x = sample_gamma(p.alpha, rng);
        let y = sample_gamma(p.beta, rng);
        let total = x + y;
        if total <= 0.0 || !total.is_finite() {
            // Both draws underflowed (tiny shapes); the mean is the best answer.
            return p.alpha / (p.alpha + p.beta);
        }
        x / total
    }

    /// Conjugate update with a continuous reward in [0, 1].
    pub fn updated(&self, reward: f64) -> Self {
        let (alpha, beta) = update_posterior(self.alpha, self.beta, reward);
        Self::new(alpha, beta)
    }
}

fn sanitize_shape(shape: f64) -> f64 {
    if shape.is_finite() && shape >= MIN_SHAPE {
        shape
    } else {
        MIN_SHAPE
    }
}

/// `(alpha + reward, beta + (1 - reward))`, with reward clamped to [0, 1].
pub fn update_posterior(alpha: f64, beta: f64, reward: f64) -> (f64, f64) {
    let reward = if reward.is_finite() {
        reward.clamp(0.0, 1.0)
    } else {
        0.5
    };
    (alpha + reward, beta + (1.0 - reward))
}

/// Map ordinal feedback onto a Bernoulli-style reward.
pub fn delta_to_reward(delta: FeedbackDelta) -> f64 {
    match delta {
        FeedbackDelta::Worse => 0.0,
        FeedbackDelta::Same => 0.5,
        FeedbackDelta::Better => 1.0,
    }
}

/// Gamma(shape, 1) draw.
///
/// `rand_distr` runs Marsaglia-Tsang for shape >= 1 and the
/// `Gamma(shape + 1) * U^(1/shape)` boost below 1.
pub fn sample_gamma<R: Rng + ?Sized>(shape: f64, rng: &mut R) -> f64 {
    let shape = sanitize_shape(shape);
    match Gamma::new(shape, 1.0) {
        Ok(dist) => dist.sample(rng),
        Err(_) => shape,
    }
}
