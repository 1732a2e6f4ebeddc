//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds a task's terminal `task_failed` event must carry:
//! `{reason_kind, human_message}`. Component-internal helpers that only ever
//! run inside one module keep returning `Result<T, String>` where that
//! matches the surrounding code (parsing helpers, validators) rather than
//! growing a variant for every leaf.

use thiserror::Error;

/// A stable, machine-readable tag for a [`CoreError`], used as
/// `task_failed.reason_kind` and as CLI exit-code selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonKind {
    Configuration,
    Transport,
    Provider,
    Sandbox,
    Parse,
    Validation,
    Semantic,
    IterationLimit,
    Cancelled,
    ContextOverflow,
    LlmFatal,
}

impl ReasonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonKind::Configuration => "configuration",
            ReasonKind::Transport => "transient_transport",
            ReasonKind::Provider => "provider_error",
            ReasonKind::Sandbox => "sandbox_error",
            ReasonKind::Parse => "parse_error",
            ReasonKind::Validation => "validation_error",
            ReasonKind::Semantic => "semantic_error",
            ReasonKind::IterationLimit => "iteration_limit",
            ReasonKind::Cancelled => "cancelled",
            ReasonKind::ContextOverflow => "context_overflow",
            ReasonKind::LlmFatal => "llm_fatal",
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("semantic error: {0}")]
    Semantic(String),

    #[error("iteration limit reached ({0} iterations)")]
    IterationLimit(usize),

    #[error("task cancelled")]
    Cancelled,

    #[error("context overflow could not be compressed")]
    ContextOverflow,

    #[error("unrecoverable LLM provider failure: {0}")]
    LlmFatal(String),
}

impl CoreError {
    pub fn reason_kind(&self) -> ReasonKind {
        match self {
            CoreError::Configuration(_) => ReasonKind::Configuration,
            CoreError::Transport(_) => ReasonKind::Transport,
            CoreError::Provider(_) => ReasonKind::Provider,
            CoreError::Sandbox(_) => ReasonKind::Sandbox,
            CoreError::Parse(_) => ReasonKind::Parse,
            CoreError::Validation(_) => ReasonKind::Validation,
            CoreError::Semantic(_) => ReasonKind::Semantic,
            CoreError::IterationLimit(_) => ReasonKind::IterationLimit,
            CoreError::Cancelled => ReasonKind::Cancelled,
            CoreError::ContextOverflow => ReasonKind::ContextOverflow,
            CoreError::LlmFatal(_) => ReasonKind::LlmFatal,
        }
    }

    /// The CLI exit code for this error, per the configured exit-code table.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Configuration(_) => 2,
            CoreError::Provider(_) | CoreError::LlmFatal(_) => 3,
            CoreError::Sandbox(_) => 4,
            CoreError::Cancelled => 130,
            _ => 5,
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
