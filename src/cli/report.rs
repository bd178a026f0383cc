//! Read-only report commands: insights, metrics, recommend, config

use kairos_core::engine::Insights;
use kairos_core::{error::Result, Goal};

use super::helpers::{build_engine, format_duration, load_config, print_json};
use super::GlobalOpts;

/// Handle `kairos insights`
pub fn handle_insights(opts: &GlobalOpts) -> Result<()> {
    let engine = build_engine(opts)?;
    let insights = engine.insights()?;

    if opts.json {
        return print_json(&insights);
    }

    let summary = match insights {
        Insights::NoData => {
            println!("No sessions recorded yet. Try `kairos select calm`.");
            return Ok(());
        }
        Insights::Summary(summary) => summary,
    };

    println!();
    println!("  Sessions:    {}", summary.total_sessions);
    for (goal, count) in &summary.sessions_by_goal {
        println!("    {:<8} {}", goal.as_str(), count);
    }
    println!("  Improved:    {:.0}%", summary.improvement_rate * 100.0);
    println!("  Avg rating:  {:+.2}", summary.average_delta);
    println!("  Practice:    {:.1} min", summary.total_minutes);
    if let Some(dose) = summary.average_dose_secs {
        println!("  Avg dose:    {}", format_duration(dose));
    }
    println!("  Streak:      {} day(s)", summary.current_streak);
    if !summary.best_by_goal.is_empty() {
        println!();
        println!("  Best so far:");
        for (goal, best) in &summary.best_by_goal {
            println!(
                "    {:<8} {} ({:.0}%, {} trials)",
                goal.as_str(),
                best.name,
                best.mean * 100.0,
                best.trials
            );
        }
    }
    println!();
    Ok(())
}

/// Handle `kairos metrics`
pub fn handle_metrics(opts: &GlobalOpts) -> Result<()> {
    let engine = build_engine(opts)?;
    let metrics = engine.algorithm_metrics()?;

    if opts.json {
        return print_json(&metrics);
    }

    println!();
    println!(
        "  {:<22} {:>6} {:>6} {:>15} {:>7} {:>6}",
        "protocol", "trials", "mean", "95% interval", "dose", "resets"
    );
    for p in &metrics.protocols {
        println!(
            "  {:<22} {:>6} {:>6.3} [{:.2}, {:.2}]    {:>7} {:>6}",
            p.protocol_id,
            p.trials,
            p.mean,
            p.credible_interval.0,
            p.credible_interval.1,
            format_duration(p.dose_seconds),
            p.reset_count
        );
    }
    println!();
    println!("  Total trials:       {}", metrics.total_trials);
    println!(
        "  Exploration budget: {:.1} (per item {:.1})",
        metrics.exploration_budget.total_budget, metrics.exploration_budget.per_item_limit
    );
    println!(
        "  Hierarchy:          {:.0}% coverage, {:?} data",
        metrics.hierarchy.coverage * 100.0,
        metrics.hierarchy.data_sufficiency
    );
    for recommendation in &metrics.hierarchy.recommendations {
        println!("    - {}", recommendation);
    }
    println!(
        "  Transfer:           {} protocols, {} episodes",
        metrics.transfer.registered_protocols, metrics.transfer.history_len
    );
    println!();
    Ok(())
}

/// Handle `kairos recommend <goal>`
pub fn handle_recommend(goal: Goal, limit: usize, opts: &GlobalOpts) -> Result<()> {
    let engine = build_engine(opts)?;
    let recommendations = engine.top_recommendations(goal, limit)?;

    if opts.json {
        return print_json(&recommendations);
    }

    if recommendations.is_empty() {
        println!("No protocols available for goal '{}'", goal);
        return Ok(());
    }

    println!();
    for (rank, rec) in recommendations.iter().enumerate() {
        println!(
            "  {}. {} - {:.0}% [{:.0}-{:.0}%], {} trials, {}",
            rank + 1,
            rec.name,
            rec.score * 100.0,
            rec.credible_interval.0 * 100.0,
            rec.credible_interval.1 * 100.0,
            rec.trials,
            format_duration(rec.dose_seconds)
        );
    }
    println!();
    Ok(())
}

/// Handle `kairos config`: print the effective configuration
pub fn handle_config(opts: &GlobalOpts) -> Result<()> {
    let config = load_config(opts)?;
    if opts.json {
        return print_json(&config);
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
