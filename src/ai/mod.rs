pub mod context;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use context::ContextManager;
pub use provider::LLMProvider;
pub use providers::{OpenAICompatibleConfig, OpenAICompatibleProvider};
pub use types::{CompletionRequest, CompletionResponse, Message, MessageRole, TokenUsage};
pub use utils::extract_confidence_from_llm_response;
