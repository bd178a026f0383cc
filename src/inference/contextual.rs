//! Hour-of-day sub-models.
//!
//! Each item carries up to 24 independent Beta posteriors keyed by hour.
//! They are always updated and reported, but the reference policy does not
//! condition selection on them: plain Thompson sampling over the global
//! posterior beat naive contextual bandits on the clear-winner and
//! close-competition workloads. `selection.contextual_selection` re-enables
//! them.

use crate::inference::beta::BetaParams;
use crate::state::{HourlyPosterior, ItemPosterior};
use crate::types::FeedbackDelta;
use rand::Rng;

/// Hours in a day; valid keys are `0..HOURS`.
pub const HOURS: u8 = 24;

/// Sample from the hour's sub-model when it has evidence, else from the
/// item's global posterior.
pub fn sample_contextual<R: Rng + ?Sized>(posterior: &ItemPosterior, hour: u8, rng: &mut R) -> f64 {
    match posterior.hourly.get(&hour) {
        Some(h) if h.trials >= 1 => h.params().sample(rng),
        _ => posterior.params().sample(rng),
    }
}

/// Trials recorded for the given hour.
pub fn hourly_trials(posterior: &ItemPosterior, hour: u8) -> u32 {
    posterior.hourly.get(&hour).map(|h| h.trials).unwrap_or(0)
}

/// Record feedback into the hour's sub-model, creating it from `prior`.
pub fn record_hourly(
    posterior: &mut ItemPosterior,
    hour: u8,
    delta: FeedbackDelta,
    reward: f64,
    prior: BetaParams,
) {
    let hour = hour % HOURS;
    posterior
        .hourly
        .entry(hour)
        .or_insert_with(|| HourlyPosterior::new(prior))
        .record(delta, reward);
}

/// Hour whose sub-model has the highest posterior mean, if any has data.
pub fn best_hour(posterior: &ItemPosterior) -> Option<(u8, f64)> {
    posterior
        .hourly
        .iter()
        .filter(|(_, h)| h.trials > 0)
        .map(|(hour, h)| (*hour, h.params().mean()))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}
