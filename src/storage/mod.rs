//! Storage layer for the Kairos state document
//!
//! The engine never touches the filesystem directly: it loads and saves one
//! [`AppState`] through a [`StateStore`]. Corrupt or unreadable documents are
//! absorbed here and replaced by a default state, so the inference core only
//! ever sees valid data.

pub mod json_file;

use crate::error::Result;
use crate::state::AppState;

pub use json_file::{default_state_dir, JsonFileStore, STATE_FILE_NAME};

/// Persistence backend for the state document
pub trait StateStore {
    /// Load the current state; a missing or corrupt document yields a default
    fn load_state(&self) -> Result<AppState>;

    /// Replace the stored state
    fn save_state(&mut self, state: &AppState) -> Result<()>;

    /// Remove all stored state
    fn clear(&mut self) -> Result<()>;
}

/// In-memory store, used by tests and the simulation harness
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Option<AppState>,
    saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a state
    pub fn with_state(state: AppState) -> Self {
        Self {
            state: Some(state),
            saves: 0,
        }
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl StateStore for MemoryStore {
    fn load_state(&self) -> Result<AppState> {
        Ok(self.state.clone().unwrap_or_default())
    }

    fn save_state(&mut self, state: &AppState) -> Result<()> {
        self.state = Some(state.clone());
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.state = None;
        Ok(())
    }
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn load_state(&self) -> Result<AppState> {
        (**self).load_state()
    }

    fn save_state(&mut self, state: &AppState) -> Result<()> {
        (**self).save_state(state)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load_state().unwrap(), AppState::default());

        let mut state = AppState::default();
        state.current_streak = 4;
        store.save_state(&state).unwrap();
        assert_eq!(store.load_state().unwrap().current_streak, 4);
        assert_eq!(store.save_count(), 1);

        store.clear().unwrap();
        assert_eq!(store.load_state().unwrap().current_streak, 0);
    }
}
