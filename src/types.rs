//! Core domain types shared by the catalog, engine and state model.

use crate::error::{KairosError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What the user wants out of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Calm,
    Focus,
    Energy,
}

impl Goal {
    /// The fixed goal set, in display order.
    pub const ALL: [Goal; 3] = [Goal::Calm, Goal::Focus, Goal::Energy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::Calm => "calm",
            Goal::Focus => "focus",
            Goal::Energy => "energy",
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Goal {
    type Err = KairosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "calm" | "relax" => Ok(Goal::Calm),
            "focus" => Ok(Goal::Focus),
            "energy" | "energize" => Ok(Goal::Energy),
            other => Err(KairosError::InvalidGoal(other.to_string())),
        }
    }
}

/// Ordinal rating given after a session.
///
/// Serialized as the bare integer (-1, 0, 1) so persisted history stays
/// readable by other tooling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "i8", into = "i8")]
pub enum FeedbackDelta {
    Worse,
    Same,
    Better,
}

impl FeedbackDelta {
    pub fn value(self) -> i8 {
        match self {
            FeedbackDelta::Worse => -1,
            FeedbackDelta::Same => 0,
            FeedbackDelta::Better => 1,
        }
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.value())
    }
}

impl TryFrom<i8> for FeedbackDelta {
    type Error = KairosError;

    fn try_from(value: i8) -> Result<Self> {
        FeedbackDelta::try_from(i64::from(value))
    }
}

impl TryFrom<i64> for FeedbackDelta {
    type Error = KairosError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(FeedbackDelta::Worse),
            0 => Ok(FeedbackDelta::Same),
            1 => Ok(FeedbackDelta::Better),
            other => Err(KairosError::InvalidFeedback(other)),
        }
    }
}

impl From<FeedbackDelta> for i8 {
    fn from(delta: FeedbackDelta) -> Self {
        delta.value()
    }
}

impl fmt::Display for FeedbackDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackDelta::Worse => write!(f, "worse"),
            FeedbackDelta::Same => write!(f, "same"),
            FeedbackDelta::Better => write!(f, "better"),
        }
    }
}

/// A selectable protocol, owned by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Protocol {
    pub id: String,
    pub name: String,
    pub goals: Vec<Goal>,
    pub base_duration_secs: u32,
    #[serde(default)]
    pub cues: Vec<String>,
}

impl Protocol {
    pub fn supports(&self, goal: Goal) -> bool {
        self.goals.contains(&goal)
    }

    pub fn base_duration(&self) -> f64 {
        f64::from(self.base_duration_secs)
    }

    /// Goal used when feedback arrives without one.
    pub fn primary_goal(&self) -> Goal {
        self.goals.first().copied().unwrap_or(Goal::Calm)
    }
}

/// One completed session, appended to the history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub timestamp_ms: i64,
    pub goal: Goal,
    pub protocol_id: String,
    pub duration_secs: f64,
    pub delta: FeedbackDelta,
}
