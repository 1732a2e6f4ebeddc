//! Tool Registry & Mask (C3).
//!
//! The catalog is static for a task's lifetime: its rendered system-prompt
//! section never changes after planning (§3 invariant — the union of tool
//! identifiers in the system prompt equals the registry's identifier set at
//! all times). Per-call phase restriction is expressed *only* through a
//! logit-bias map (`bias_for`), never by mutating the message history or the
//! rendered catalog text — mutating the textual tool list between calls
//! would invalidate the provider's KV cache.

use std::collections::HashMap;

use crate::action::Action;
use crate::phase::Phase;

/// One named parameter of a [`ToolSpec`].
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
}

/// A tool's identifier, parameter schema, description, and phase
/// availability set.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub id: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub phases: &'static [Phase],
}

impl ToolSpec {
    pub fn allowed_in(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}

macro_rules! params {
    ($(($name:literal, $required:literal)),* $(,)?) => {
        &[$(ParamSpec { name: $name, required: $required }),*]
    };
}

/// The canonical catalog: identifiers and the phases in which they are valid
/// (§4.3's table). Declared once as a `const` so every task's rendered
/// catalog text is byte-identical.
pub const CATALOG: &[ToolSpec] = &[
    ToolSpec {
        id: "CREATE_FILE",
        description: "Create or overwrite a file in the sandbox workspace.",
        params: params![("PATH", true), ("CONTENT", true)],
        phases: &[Phase::Executing],
    },
    ToolSpec {
        id: "READ_FILE",
        description: "Read a file from the sandbox workspace.",
        params: params![("PATH", true)],
        phases: &[Phase::Planning, Phase::Executing, Phase::Verifying, Phase::Learning],
    },
    ToolSpec {
        id: "EXECUTE",
        description: "Run a shell command in the sandbox workspace.",
        params: params![("COMMAND", true), ("TIMEOUT_SECONDS", false)],
        phases: &[Phase::Executing, Phase::Verifying],
    },
    ToolSpec {
        id: "LIST_FILES",
        description: "List entries under a path in the sandbox workspace.",
        params: params![("PATH", true)],
        phases: &[Phase::Planning, Phase::Executing, Phase::Verifying, Phase::Learning],
    },
    ToolSpec {
        id: "UPDATE_TODO",
        description: "Rewrite the task's todo.md with the supplied content.",
        params: params![("CONTENT", true)],
        phases: &[Phase::Planning, Phase::Executing],
    },
    ToolSpec {
        id: "VERIFY",
        description: "Run a check (typically a test command) and record a verification.",
        params: params![("COMMAND", true)],
        phases: &[Phase::Verifying],
    },
    ToolSpec {
        id: "BROWSER",
        description: "Delegate a browser-automation task or structured action.",
        params: params![("TASK", false), ("TOOL", false), ("URL", false), ("SELECTOR", false), ("VALUE", false)],
        phases: &[Phase::Executing, Phase::Browsing],
    },
    ToolSpec {
        id: "SEARCH_WEB",
        description: "Search the web and/or research a question via the knowledge sub-agent.",
        params: params![("QUERY", true), ("MAX_RESULTS", false), ("DEPTH", false)],
        phases: &[Phase::Planning, Phase::Executing, Phase::Learning],
    },
    ToolSpec {
        id: "THINK",
        description: "Record a thought with no side effect.",
        params: params![("CONTENT", true)],
        phases: &[Phase::Planning, Phase::Executing, Phase::Verifying, Phase::Learning],
    },
    ToolSpec {
        id: "DELEGATE",
        description: "Delegate a subtask to a sub-agent via the orchestrator.",
        params: params![("AGENT_KIND", true), ("TASK", true), ("SHAPE", false)],
        phases: &[Phase::Executing],
    },
    ToolSpec {
        id: "TASK_COMPLETED",
        description: "Signal that the task is finished.",
        params: params![("MESSAGE", false)],
        phases: &[Phase::Executing, Phase::Learning],
    },
];

pub fn find(tool_id: &str) -> Option<&'static ToolSpec> {
    CATALOG.iter().find(|t| t.id == tool_id)
}

/// Render the catalog's system-prompt section. Identical bytes across every
/// call in a task (cache-preservation invariant, §8 "tool-list stability").
pub fn system_prompt_section() -> String {
    let mut out = String::from("Available tools:\n");
    for spec in CATALOG {
        out.push_str(&format!("- {}: {}\n", spec.id, spec.description));
        for p in spec.params {
            out.push_str(&format!(
                "    {} ({})\n",
                p.name,
                if p.required { "required" } else { "optional" }
            ));
        }
    }
    out
}

/// A per-call token → bias value map. `−100` suppresses every tool
/// identifier not valid in `phase`; this is the only per-call mechanism that
/// differentiates tool availability.
pub fn bias_for(phase: Phase, suppression_strength: i32) -> HashMap<String, i32> {
    CATALOG
        .iter()
        .filter(|spec| !spec.allowed_in(phase))
        .map(|spec| (spec.id.to_string(), -suppression_strength))
        .collect()
}

/// The outcome of validating a parsed [`Action`] against the catalog and the
/// current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Ok,
    InvalidTool,
    NotAllowedInPhase,
    MissingParam(&'static str),
    UnknownParam(String),
}

impl Validation {
    pub fn reason(&self) -> &str {
        match self {
            Validation::Ok => "ok",
            Validation::InvalidTool => "invalid_tool",
            Validation::NotAllowedInPhase => "not_allowed_in_phase",
            Validation::MissingParam(_) => "missing_param",
            Validation::UnknownParam(_) => "unknown_param",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Validation::Ok)
    }
}

pub fn validate(action: &Action, phase: Phase) -> Validation {
    let Some(spec) = find(&action.tool) else {
        return Validation::InvalidTool;
    };
    if !spec.allowed_in(phase) {
        return Validation::NotAllowedInPhase;
    }
    for p in spec.params {
        if p.required && !action.params.contains_key(p.name) {
            return Validation::MissingParam(p.name);
        }
    }
    let known: Vec<&str> = spec.params.iter().map(|p| p.name).collect();
    for key in action.params.keys() {
        if !known.contains(&key.as_str()) {
            return Validation::UnknownParam(key.clone());
        }
    }
    Validation::Ok
}
