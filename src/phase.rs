//! The agent's execution phase and the tool-availability it gates.

use serde::{Deserialize, Serialize};

/// The agent's current execution mode.
///
/// Invariant: at any instant a live task has exactly one phase; transitions
/// are written to the event stream. The phase gates which tools the model
/// may emit (see [`crate::tools::catalog`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Planning,
    Executing,
    Verifying,
    Browsing,
    Learning,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::Verifying => "verifying",
            Phase::Browsing => "browsing",
            Phase::Learning => "learning",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
