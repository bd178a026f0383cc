//! Kairos - On-Device Adaptive Protocol Recommender
//!
//! Command-line front end: pick a breathing protocol for a goal, record how
//! the session went, and inspect what the engine has learned.

mod cli;

use clap::{Parser, Subcommand};
use cli::GlobalOpts;
use kairos_core::Goal;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "kairos")]
#[command(about = "Adaptive breathing protocol recommender", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// State directory (overrides KAIROS_STATE_DIR and the default)
    #[arg(long, env = "KAIROS_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "KAIROS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// JSON protocol catalog replacing the built-in one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Print JSON instead of a human summary
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick a protocol and session length for a goal
    Select {
        /// calm, focus or energy
        goal: Goal,

        /// Show why the protocol was picked
        #[arg(long)]
        explain: bool,
    },

    /// Record how a session went
    Feedback {
        /// Protocol id
        protocol: String,

        /// -1 (worse), 0 (same) or 1 (better)
        #[arg(allow_negative_numbers = true)]
        delta: i64,

        /// Seconds actually practised (defaults to the suggested dose)
        #[arg(long)]
        duration: Option<f64>,

        /// Goal to attribute the session to (defaults to the pending selection's)
        #[arg(long)]
        goal: Option<Goal>,
    },

    /// Usage summary
    Insights,

    /// Internal state of every learner
    Metrics,

    /// Protocols ranked by their pooled estimate for a goal
    Recommend {
        goal: Goal,

        #[arg(short, long, default_value = "3")]
        limit: usize,
    },

    /// Run a synthetic scenario against an in-memory engine
    Simulate {
        /// clear-winner, close-competition or drift (all when omitted)
        scenario: Option<String>,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Override the scenario's trial count
        #[arg(long)]
        trials: Option<usize>,
    },

    /// Forget everything learned
    Reset {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::new(format!(
        "kairos={level},kairos_core={level}",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Kairos v{} starting...", env!("CARGO_PKG_VERSION"));

    let opts = GlobalOpts {
        state_dir: cli.state_dir,
        config: cli.config,
        catalog: cli.catalog,
        json: cli.json,
    };

    match cli.command {
        Commands::Select { goal, explain } => cli::select::handle(goal, explain, &opts)?,
        Commands::Feedback {
            protocol,
            delta,
            duration,
            goal,
        } => cli::feedback::handle(protocol, delta, duration, goal, &opts)?,
        Commands::Insights => cli::report::handle_insights(&opts)?,
        Commands::Metrics => cli::report::handle_metrics(&opts)?,
        Commands::Recommend { goal, limit } => cli::report::handle_recommend(goal, limit, &opts)?,
        Commands::Simulate {
            scenario,
            seed,
            trials,
        } => cli::simulate::handle(scenario, seed, trials, &opts)?,
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("Refusing to delete learning state without --yes");
            }
            let mut engine = cli::helpers::build_engine(&opts)?;
            engine.reset()?;
            if !opts.json {
                println!("Learning state cleared");
            }
        }
        Commands::Config => cli::report::handle_config(&opts)?,
    }

    Ok(())
}
