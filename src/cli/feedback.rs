//! Session feedback command

use kairos_core::{error::Result, Catalog, FeedbackDelta, Goal};

use super::helpers::{build_engine, format_duration, print_json};
use super::GlobalOpts;

/// Handle `kairos feedback <protocol> <delta>`
///
/// Without `--duration` the session is assumed to have run for the dose
/// that was suggested: the pending selection, else the learned dose, else
/// the base duration.
pub fn handle(
    protocol_id: String,
    delta: i64,
    duration: Option<f64>,
    goal: Option<Goal>,
    opts: &GlobalOpts,
) -> Result<()> {
    let delta = FeedbackDelta::try_from(delta)?;
    let mut engine = build_engine(opts)?;

    let duration = match duration {
        Some(secs) => secs,
        None => {
            let state = engine.load_state()?;
            state
                .pending_selection
                .as_ref()
                .filter(|p| p.protocol_id == protocol_id)
                .map(|p| p.dose_seconds)
                .or_else(|| state.posterior(&protocol_id).map(|p| p.dose_seconds))
                .or_else(|| engine.catalog().by_id(&protocol_id).map(|p| p.base_duration()))
                .unwrap_or(0.0)
        }
    };

    let outcome = match goal {
        Some(goal) => engine.record_feedback_for_goal(&protocol_id, goal, delta, duration)?,
        None => engine.record_feedback(&protocol_id, delta, duration)?,
    };

    if opts.json {
        return print_json(&outcome);
    }

    println!();
    println!("  Recorded '{}' for {} ({})", outcome.delta, outcome.protocol_id, outcome.goal);
    println!(
        "  Estimate: {:.0}% over {} session(s)",
        outcome.mean * 100.0,
        outcome.trials
    );
    if (outcome.dose_seconds - outcome.previous_dose).abs() > f64::EPSILON {
        println!(
            "  Next dose: {} (was {})",
            format_duration(outcome.dose_seconds),
            format_duration(outcome.previous_dose)
        );
    } else {
        println!("  Next dose: {}", format_duration(outcome.dose_seconds));
    }
    println!("  Streak: {} day(s)", outcome.current_streak);
    println!();
    Ok(())
}
