//! JSON file state store
//!
//! One document per state directory. Writes go to a sibling temp file and
//! are renamed into place so an interrupted save never leaves a truncated
//! document behind.

use super::StateStore;
use crate::config::EngineConfig;
use crate::error::{KairosError, Result};
use crate::state::{migrate, AppState};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fixed storage identifier of the state document
pub const STATE_FILE_NAME: &str = "kairos-state-v1.json";

/// Default state directory (`<data_local_dir>/kairos`)
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kairos")
}

/// File-backed [`StateStore`]
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    config: EngineConfig,
}

impl JsonFileStore {
    /// Store rooted at `dir`, using `dir/kairos-state-v1.json`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_config(dir, EngineConfig::default())
    }

    /// Store whose load-time repair uses `config` for defaults
    pub fn with_config(dir: impl AsRef<Path>, config: EngineConfig) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE_NAME),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<String> {
        let file = File::open(&self.path).map_err(|e| {
            KairosError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open state file: {}", e),
            ))
        })?;
        let mut content = String::new();
        BufReader::new(file).read_to_string(&mut content)?;
        Ok(content)
    }
}

impl StateStore for JsonFileStore {
    fn load_state(&self) -> Result<AppState> {
        if !self.path.exists() {
            debug!("No state at {}, starting fresh", self.path.display());
            return Ok(AppState::default());
        }

        let content = match self.read_document() {
            Ok(content) => content,
            Err(e) => {
                warn!("Unreadable state at {}: {}; using defaults", self.path.display(), e);
                return Ok(AppState::default());
            }
        };

        match migrate::from_json_with(&content, &self.config) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!("Corrupt state at {}: {}; using defaults", self.path.display(), e);
                Ok(AppState::default())
            }
        }
    }

    fn save_state(&mut self, state: &AppState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KairosError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create state directory: {}", e),
                ))
            })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path).map_err(|e| {
                KairosError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create state file: {}", e),
                ))
            })?;
            let mut writer = BufWriter::new(file);
            // Compact JSON; the document is machine-owned
            serde_json::to_writer(&mut writer, state)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        debug!(
            "Saved state ({} sessions) to {}",
            state.session_history.len(),
            self.path.display()
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::beta::BetaParams;
    use crate::state::ItemPosterior;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert_eq!(store.load_state().unwrap(), AppState::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("nested"));

        let mut state = AppState::default();
        let mut posterior = ItemPosterior::with_prior(BetaParams::new(1.5, 1.0), 120.0);
        posterior.trials = 3;
        posterior.alpha = 3.5;
        posterior.recent_scores.extend([1.0, 0.0, 1.0]);
        state.posteriors.insert("box-breathing".to_string(), posterior);
        state.current_streak = 2;

        store.save_state(&state).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load_state().unwrap(), state);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATE_FILE_NAME), "{\"posteriors\": [").unwrap();
        let store = JsonFileStore::new(dir.path());
        assert_eq!(store.load_state().unwrap(), AppState::default());
    }

    #[test]
    fn test_clear_removes_document() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::new(dir.path());
        store.save_state(&AppState::default()).unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }
}
