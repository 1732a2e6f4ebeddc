use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
        }
    }
}

/// Request for LLM completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "openai/gpt-4", "anthropic/claude-sonnet-4.5")
    pub model: String,

    /// The messages in the conversation
    pub messages: Vec<Message>,

    /// Temperature for sampling (0.0 to 2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Top-p sampling parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Whether to stream the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Per-token additive logit adjustment in [-100, 100]. The wire name
    /// matches the OpenAI-compatible `logit_bias` field (§6.3).
    #[serde(rename = "logit_bias", skip_serializing_if = "Option::is_none")]
    pub bias_map: Option<HashMap<String, i32>>,

    /// Asks the provider to preserve its prefix KV cache across calls that
    /// share a byte-identical message prefix (§4.2, §8 "prefix stability").
    #[serde(rename = "user_cache_key", skip_serializing_if = "Option::is_none")]
    pub cache_hint: Option<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stream: None,
            bias_map: None,
            cache_hint: None,
        }
    }

    pub fn with_bias_map(mut self, bias_map: HashMap<String, i32>) -> Self {
        self.bias_map = Some(bias_map);
        self
    }

    pub fn with_cache_hint(mut self, cache_hint: impl Into<String>) -> Self {
        self.cache_hint = Some(cache_hint.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

/// Response from LLM completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated content
    pub content: String,

    /// The model that generated the response
    pub model: String,

    /// Token usage information
    pub usage: Option<TokenUsage>,

    /// Finish reason (e.g., "stop", "length", "content_filter")
    pub finish_reason: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A chunk of a streaming response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The delta content for this chunk
    pub delta: String,

    /// Whether this is the final chunk
    pub is_final: bool,

    /// Finish reason if this is the final chunk
    pub finish_reason: Option<String>,
}
