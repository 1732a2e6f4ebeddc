//! Agent execution core: a phase-gated reasoning loop for an autonomous
//! software-engineering agent.
//!
//! The crate is organized around the components of the execution pipeline:
//! a sandboxed workspace (`sandbox`), an LLM client (`ai`), a static tool
//! catalog with phase-based suppression (`tools`, `phase`), an action
//! grammar and planner (`agent`), sub-agents for research and browsing
//! (`knowledge`, `browser`), multi-agent delegation (`orchestrator`),
//! cross-task learning stores (`learning`), an append-only per-task event
//! stream (`events`), and the task/session bookkeeping that ties a run
//! together (`task`, `session`).

pub mod action;
pub mod agent;
pub mod ai;
pub mod browser;
pub mod config;
pub mod error;
pub mod events;
pub mod knowledge;
pub mod learning;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod sandbox;
pub mod session;
pub mod task;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types.
///
/// ```rust
/// use agent_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::action::{Action, ParseOutcome};
    pub use crate::agent::{AgentLoop, Collaborators, Plan};
    pub use crate::ai::provider::LLMProvider;
    pub use crate::ai::types::{CompletionRequest, CompletionResponse, Message, MessageRole};
    pub use crate::config::AppConfig;
    pub use crate::error::{CoreError, CoreResult, ReasonKind};
    pub use crate::events::{Event, EventKind, EventStream};
    pub use crate::phase::Phase;
    pub use crate::sandbox::{SandboxClient, SandboxHandle};
    pub use crate::session::SessionManager;
    pub use crate::task::{CancelToken, Task, TaskId, TaskSnapshot, TaskStatus};
}
