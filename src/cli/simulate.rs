//! Synthetic scenario command

use kairos_core::engine::Phase;
use kairos_core::error::Result;
use kairos_core::simulation::{self, Scenario};

use super::helpers::{load_config, print_json};
use super::GlobalOpts;

/// Handle `kairos simulate [scenario]`
///
/// Runs against an in-memory store; the persisted state is never touched.
pub fn handle(
    scenario: Option<String>,
    seed: u64,
    trials: Option<usize>,
    opts: &GlobalOpts,
) -> Result<()> {
    let config = load_config(opts)?;
    let scenarios = match scenario {
        Some(name) => vec![Scenario::by_name(&name)?],
        None => vec![
            Scenario::clear_winner(),
            Scenario::close_competition(),
            Scenario::drift(),
        ],
    };

    let mut reports = Vec::with_capacity(scenarios.len());
    for mut scenario in scenarios {
        if let Some(trials) = trials {
            scenario.trials = trials;
        }
        let report = simulation::run(&scenario, seed, config.clone())?;

        if !opts.json {
            println!();
            println!("  {} (seed {}, {} trials)", report.scenario, seed, report.steps.len());
            for arm in &scenario.arms {
                println!(
                    "    {:<4} rate {:.2}{}  picked {:>4}  last-50 share {:.2}",
                    arm.protocol_id,
                    arm.success_rate,
                    arm.change
                        .map(|(at, rate)| format!(" -> {:.2} @{}", rate, at))
                        .unwrap_or_default(),
                    report.selections(&arm.protocol_id),
                    report.share_in_last(&arm.protocol_id, 50)
                );
            }
            let phases: Vec<String> = Phase::ORDER
                .iter()
                .map(|phase| (phase, report.phase_count(*phase)))
                .filter(|(_, count)| *count > 0)
                .map(|(phase, count)| format!("{}={}", phase, count))
                .collect();
            println!("    phases: {}", phases.join(" "));
        }
        reports.push(report);
    }

    if opts.json {
        return print_json(&reports);
    }
    println!();
    Ok(())
}
