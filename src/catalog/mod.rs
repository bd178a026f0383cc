//! Protocol catalog
//!
//! The catalog is static data consumed by the engine through the [`Catalog`]
//! trait. [`StaticCatalog`] covers both the built-in protocol list and a
//! JSON file supplied by the user.

pub mod builtin;

use crate::error::{KairosError, Result};
use crate::types::{Goal, Protocol};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

pub use builtin::BUILTIN_PROTOCOLS;

/// Read-only access to the protocol list
pub trait Catalog {
    /// Every protocol, in display order
    fn protocols(&self) -> &[Protocol];

    /// Protocols supporting a goal
    fn by_goal(&self, goal: Goal) -> Vec<&Protocol> {
        self.protocols().iter().filter(|p| p.supports(goal)).collect()
    }

    /// Protocol with the given id
    fn by_id(&self, id: &str) -> Option<&Protocol> {
        self.protocols().iter().find(|p| p.id == id)
    }
}

/// In-memory catalog
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    protocols: Vec<Protocol>,
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StaticCatalog {
    /// Catalog with the validated protocol list
    pub fn new(protocols: Vec<Protocol>) -> Result<Self> {
        let mut seen = HashSet::new();
        for protocol in &protocols {
            if protocol.id.trim().is_empty() {
                return Err(KairosError::InvalidConfig(
                    "catalog protocol with empty id".to_string(),
                ));
            }
            if !seen.insert(protocol.id.as_str()) {
                return Err(KairosError::InvalidConfig(format!(
                    "duplicate protocol id in catalog: {}",
                    protocol.id
                )));
            }
            if protocol.goals.is_empty() {
                return Err(KairosError::InvalidConfig(format!(
                    "protocol {} supports no goals",
                    protocol.id
                )));
            }
        }

        Ok(Self { protocols })
    }

    /// The protocols shipped with the crate
    pub fn builtin() -> Self {
        Self {
            protocols: BUILTIN_PROTOCOLS.clone(),
        }
    }

    /// Parse a JSON array of protocols
    pub fn from_json(json: &str) -> Result<Self> {
        let protocols: Vec<Protocol> = serde_json::from_str(json)?;
        Self::new(protocols)
    }

    /// Load a JSON catalog file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading catalog from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl Catalog for StaticCatalog {
    fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_goal() {
        let catalog = StaticCatalog::builtin();
        for goal in Goal::ALL {
            assert!(!catalog.by_goal(goal).is_empty(), "no protocol for {}", goal);
        }
        assert_eq!(catalog.by_id("4-7-8").unwrap().name, "4-7-8 Breathing");
        assert!(catalog.by_id("missing").is_none());
    }

    #[test]
    fn test_from_json() {
        let catalog = StaticCatalog::from_json(
            r#"[
                {"id": "a", "name": "A", "goals": ["calm"], "base_duration_secs": 90},
                {"id": "b", "name": "B", "goals": ["energy", "focus"], "base_duration_secs": 60, "cues": ["go"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(catalog.protocols().len(), 2);
        assert_eq!(catalog.by_goal(Goal::Focus).len(), 1);
        assert!(catalog.by_id("a").unwrap().cues.is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_goalless_protocols() {
        let dup = StaticCatalog::from_json(
            r#"[
                {"id": "a", "name": "A", "goals": ["calm"], "base_duration_secs": 90},
                {"id": "a", "name": "A2", "goals": ["calm"], "base_duration_secs": 90}
            ]"#,
        );
        assert!(matches!(dup, Err(KairosError::InvalidConfig(_))));

        let goalless = StaticCatalog::from_json(
            r#"[{"id": "a", "name": "A", "goals": [], "base_duration_secs": 90}]"#,
        );
        assert!(goalless.is_err());
    }
}
