//! TOML configuration schema for the agent execution core.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.agent-core/config.toml`:
//! ```toml
//! [provider]
//! base_url = "https://api.openai.com/v1"
//! default_model = "gpt-4o-mini"
//! request_timeout_secs = 120
//!
//! [sandbox]
//! endpoint = "https://sandbox.internal/rpc"
//! workspace_root = "/workspace"
//!
//! [loop_]
//! max_iterations = 100
//! suppression_strength = 100
//!
//! [events]
//! subscriber_buffer = 256
//!
//! [orchestrator]
//! default_concurrency = 8
//!
//! [planner]
//! enabled = true
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── ProviderConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key for the LLM endpoint. Required for any real request; empty
    /// means unauthenticated (used by local/test endpoints).
    pub api_key: String,
    /// Base URL of the OpenAI-compatible chat-completions endpoint.
    pub base_url: String,
    /// Default model identifier (e.g. `"gpt-4o-mini"`).
    pub default_model: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// The provider's context window, used by compaction.
    pub context_limit: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_owned(),
            default_model: "gpt-4o-mini".to_owned(),
            request_timeout_secs: 120,
            context_limit: 128_000,
        }
    }
}

// ─── SandboxConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// RPC endpoint of the remote sandbox provider.
    pub endpoint: String,
    /// API key for the sandbox provider.
    pub api_key: String,
    /// The workspace mount path inside every provisioned sandbox.
    pub workspace_root: String,
    /// Default `exec` timeout in seconds, clamped to `max_exec_timeout_secs`.
    pub default_exec_timeout_secs: u64,
    /// Hard upper bound on a caller-supplied `exec` timeout.
    pub max_exec_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            workspace_root: "/workspace".to_owned(),
            default_exec_timeout_secs: 300,
            max_exec_timeout_secs: 1800,
        }
    }
}

// ─── LoopConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Iteration ceiling before the task fails with `iteration_limit`.
    pub max_iterations: usize,
    /// Magnitude of the logit bias applied to disallowed tool tokens.
    pub suppression_strength: i32,
    /// Sampling temperature per phase; falls back to `default_temperature`
    /// when a phase has no override.
    pub phase_temperature_overrides: HashMap<String, f32>,
    pub default_temperature: f32,
    pub max_tokens: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            suppression_strength: 100,
            phase_temperature_overrides: HashMap::new(),
            default_temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

// ─── EventsConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber broadcast buffer depth; overflow drops the subscriber
    /// with a `subscriber_lagged` terminal event.
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { subscriber_buffer: 256 }
    }
}

// ─── OrchestratorConfig ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrency ceiling for the Parallel execution shape.
    pub default_concurrency: usize,
    /// Minimum share for the Consensus execution shape to declare agreement.
    pub default_min_agreement: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { default_concurrency: 8, default_min_agreement: 0.6 }
    }
}

// ─── PlannerConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    /// When false, the loop proceeds straight to a generic todo seed without
    /// issuing the one-shot planning call.
    pub enabled: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.agent-core/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub sandbox: SandboxConfig,
    #[serde(rename = "loop_")]
    pub loop_: LoopConfig,
    pub events: EventsConfig,
    pub orchestrator: OrchestratorConfig,
    pub planner: PlannerConfig,
}
