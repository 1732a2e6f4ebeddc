//! LLM Client (C2): the `complete` contract consumed by the agent loop.

use async_trait::async_trait;

use crate::error::CoreError;

use super::types::{CompletionRequest, CompletionResponse};

/// Abstracts a black-box chat-completion endpoint honoring a per-token bias
/// map and a prefix-cache hint (§4.2, §6.3). Failure modes:
///
/// - `rate_limited`: the implementation retries with jitter up to 3 times
///   before returning [`CoreError::Transport`].
/// - `context_overflow`: returned as [`CoreError::ContextOverflow`]; the
///   loop compresses history and retries (§4.11.b), not this trait.
/// - `provider_error`: returned as [`CoreError::Provider`] immediately, no
///   retry — the loop decides whether this is task-fatal (planning call) or
///   iteration-fatal (any other call, §7).
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, CoreError>;

    /// The provider's context window, used by compaction (§4.11.b).
    fn context_limit(&self) -> usize;

    fn provider_name(&self) -> &str;
}
