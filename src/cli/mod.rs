//! CLI command handlers
//!
//! Each subcommand is implemented in its own module. Handlers build an
//! engine from the global options, do one thing, and print either a human
//! summary or JSON.

pub mod feedback;
pub mod helpers;
pub mod report;
pub mod select;
pub mod simulate;

use std::path::PathBuf;

/// Options shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub state_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub json: bool,
}
