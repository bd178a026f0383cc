//! Shared helper functions for CLI commands
//!
//! State directory resolution, configuration and catalog loading, and JSON
//! output.

use kairos_core::{
    default_state_dir, error::Result, DecisionEngine, EngineConfig, JsonFileStore, StaticCatalog,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

use super::GlobalOpts;

/// Engine type used by every command
pub type CliEngine = DecisionEngine<StaticCatalog, JsonFileStore>;

/// State directory from the CLI flag (or `KAIROS_STATE_DIR`), else the default
pub fn get_state_dir(opts: &GlobalOpts) -> PathBuf {
    opts.state_dir.clone().unwrap_or_else(default_state_dir)
}

pub fn load_config(opts: &GlobalOpts) -> Result<EngineConfig> {
    EngineConfig::load(opts.config.as_deref())
}

pub fn load_catalog(opts: &GlobalOpts) -> Result<StaticCatalog> {
    match &opts.catalog {
        Some(path) => {
            debug!("Loading catalog from {}", path.display());
            StaticCatalog::from_file(path)
        }
        None => Ok(StaticCatalog::builtin()),
    }
}

/// Engine over the JSON state file in the resolved state directory
pub fn build_engine(opts: &GlobalOpts) -> Result<CliEngine> {
    let config = load_config(opts)?;
    let catalog = load_catalog(opts)?;
    let state_dir = get_state_dir(opts);
    debug!("Using state directory {}", state_dir.display());

    let store = JsonFileStore::with_config(&state_dir, config.clone());
    Ok(DecisionEngine::new(catalog, store, config))
}

/// Pretty-print a value as JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Seconds as "2m 30s"
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as u64;
    match (total / 60, total % 60) {
        (0, s) => format!("{}s", s),
        (m, 0) => format!("{}m", m),
        (m, s) => format!("{}m {}s", m, s),
    }
}
