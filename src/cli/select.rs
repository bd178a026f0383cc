//! Protocol selection command

use kairos_core::{error::Result, Goal};
use tracing::debug;

use super::helpers::{build_engine, format_duration, print_json};
use super::GlobalOpts;

/// Handle `kairos select <goal>`
pub fn handle(goal: Goal, explain: bool, opts: &GlobalOpts) -> Result<()> {
    let mut engine = build_engine(opts)?;
    let Some(decision) = engine.select_protocol(goal)? else {
        if opts.json {
            println!("null");
        } else {
            println!("No protocols available for goal '{}'", goal);
        }
        return Ok(());
    };
    debug!(protocol = %decision.protocol.id, "Selection complete");

    if opts.json {
        return print_json(&decision);
    }

    println!();
    println!("  {} ({})", decision.protocol.name, decision.protocol.id);
    println!("  Goal:     {}", goal);
    println!("  Duration: {}", format_duration(decision.dose_seconds));
    if !decision.protocol.cues.is_empty() {
        println!("  Cues:     {}", decision.protocol.cues.join(" / "));
    }

    if explain {
        let trace = &decision.trace;
        println!();
        if let Some(phase) = trace.phase {
            println!("  Phase:    {}", phase);
        }
        println!("  Reason:   {}", trace.reason);
        for reset in &trace.drift_resets {
            println!(
                "  Reset:    {} (variance {:.2}, {} trials dropped)",
                reset.protocol_id, reset.variance, reset.trials_before
            );
        }
        if let Some(ensemble) = &trace.ensemble {
            println!("  Ensemble: consensus {:.2}", ensemble.consensus_score);
        }
        if let Some(transfer) = &trace.transfer {
            let neighbors: Vec<&str> = transfer.neighbors.iter().map(|(id, _)| id.as_str()).collect();
            println!("  Prior:    borrowed from {}", neighbors.join(", "));
        }
        if let Some(advice) = &trace.exploration {
            println!(
                "  Explore:  {} (EVPI {:.4})",
                if advice.explore { "yes" } else { "no" },
                advice.evpi
            );
        }
    }
    println!();
    println!("  Rate it afterwards: kairos feedback {} <-1|0|1>", decision.protocol.id);
    Ok(())
}
