//! The parsed, typed output of one model-emitted `ACTION:` block (C4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One parsed tool invocation. Immutable once parsed (§3 invariant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Uppercase tool identifier, e.g. `CREATE_FILE`.
    pub tool: String,
    /// Key → value, keys uppercased as the grammar requires.
    pub params: HashMap<String, String>,
    /// The raw text span this action was parsed from (for audit/round-trip).
    pub raw: String,
    /// Position of this action within its iteration's parse order.
    pub seq_index: usize,
}

impl Action {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Re-render this action via the documented grammar. Used by the parser
    /// round-trip property test (§8).
    pub fn render(&self) -> String {
        let mut out = format!("ACTION: {}\n", self.tool);
        for (k, v) in &self.params {
            out.push_str(&format!("{k}: {v}\n"));
        }
        out.push_str("---END---");
        out
    }
}

/// Outcome of parsing one assistant response: zero or more actions, plus an
/// optional terminal sentinel captured from a `TASK_COMPLETED` marker.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub actions: Vec<Action>,
    /// Blocks that failed to parse, with a reason; later valid blocks still
    /// execute (§4.4).
    pub parse_errors: Vec<String>,
    /// Final message captured when `TASK_COMPLETED` is signalled.
    pub task_completed_message: Option<String>,
}

impl ParseOutcome {
    pub fn is_task_completed(&self) -> bool {
        self.task_completed_message.is_some()
            || self.actions.iter().any(|a| a.tool == "TASK_COMPLETED")
    }
}
