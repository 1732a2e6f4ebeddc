use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::ai::provider::LLMProvider;
use crate::ai::types::{CompletionRequest, CompletionResponse, Message as AppMessage, MessageRole, TokenUsage};
use crate::error::CoreError;

/// Default timeout for HTTP requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries applied only to `rate_limited` responses (§4.2's `LLMProvider`
/// contract); all other failures are returned immediately.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// OpenAI-compatible message format for API requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logit_bias: Option<HashMap<String, i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

/// OpenAI-compatible chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[allow(dead_code)]
    id: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Error body shape most OpenAI-compatible providers return.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Configuration for an [`OpenAICompatibleProvider`] — one configured
/// endpoint, key, and model (§6.5).
#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    /// API key for authentication (empty for local providers).
    pub api_key: String,
    /// Base URL for the API endpoint, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Default model to use.
    pub default_model: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Context window size reported by [`LLMProvider::context_limit`].
    pub context_limit: usize,
    /// Additional HTTP headers some endpoints require.
    pub extra_headers: HashMap<String, String>,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            default_model: String::new(),
            timeout: DEFAULT_TIMEOUT,
            context_limit: 128_000,
            extra_headers: HashMap::new(),
        }
    }
}

impl OpenAICompatibleConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: model.into(),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn context_limit(mut self, tokens: usize) -> Self {
        self.context_limit = tokens;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

/// Generic OpenAI-Compatible Provider — works against any endpoint
/// implementing the chat-completions protocol.
pub struct OpenAICompatibleProvider {
    client: Client,
    config: OpenAICompatibleConfig,
    provider_name: String,
}

impl OpenAICompatibleProvider {
    pub fn new(config: OpenAICompatibleConfig, provider_name: impl Into<String>) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            provider_name: provider_name.into(),
        })
    }

    fn convert_message(msg: &AppMessage) -> ApiMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        ApiMessage {
            role: role.to_string(),
            content: msg.content.clone(),
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            logit_bias: request.bias_map.clone(),
            user: request.cache_hint.clone(),
        }
    }

    fn auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    /// Sends the request, retrying only `429 Too Many Requests` with
    /// jittered exponential backoff (§4.2). Any other non-success status is
    /// mapped straight to [`CoreError::Provider`] or
    /// [`CoreError::ContextOverflow`], no retry.
    async fn send_with_retry(&self, api_request: &ChatCompletionRequest) -> Result<Response, CoreError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            if attempt > 0 {
                let base_ms = 250u64 * (1 << (attempt - 1));
                let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2);
                tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
            }

            let mut builder = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(api_request);
            if let Some(auth) = self.auth_header() {
                builder = builder.header("Authorization", auth);
            }
            for (key, value) in &self.config.extra_headers {
                builder = builder.header(key, value);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| CoreError::Transport(format!("{} request failed: {e}", self.provider_name)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(CoreError::Transport(format!("rate limited after retries: {message}")));
            }
            if status == StatusCode::REQUEST_ENTITY_TOO_LARGE || looks_like_context_overflow(&message) {
                return Err(CoreError::ContextOverflow);
            }
            return Err(CoreError::Provider(format!("{} returned {status}: {message}", self.provider_name)));
        }

        Err(CoreError::Transport(format!("{} rate limited after retries", self.provider_name)))
    }
}

fn looks_like_context_overflow(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("context") && (lower.contains("too long") || lower.contains("maximum") || lower.contains("exceed"))
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, CoreError> {
        let api_request = self.build_request(&request);
        let response = self.send_with_retry(&api_request).await?;

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("failed to parse response body: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Provider("no choices in response".into()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            model: api_response.model,
            usage: api_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    fn context_limit(&self) -> usize {
        self.config.context_limit
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn message_conversion_maps_all_roles() {
        assert_eq!(OpenAICompatibleProvider::convert_message(&AppMessage::system("s")).role, "system");
        assert_eq!(OpenAICompatibleProvider::convert_message(&AppMessage::user("u")).role, "user");
        assert_eq!(OpenAICompatibleProvider::convert_message(&AppMessage::assistant("a")).role, "assistant");
        assert_eq!(OpenAICompatibleProvider::convert_message(&AppMessage::tool("t")).role, "tool");
    }

    #[test]
    fn provider_creation_and_accessors() {
        let config = OpenAICompatibleConfig::new("key", "https://api.example.com/v1", "test-model")
            .context_limit(64_000);
        let provider = OpenAICompatibleProvider::new(config, "example").unwrap();
        assert_eq!(provider.provider_name(), "example");
        assert_eq!(provider.context_limit(), 64_000);
    }

    #[test]
    fn build_request_forwards_bias_map_and_cache_hint() {
        let config = OpenAICompatibleConfig::new("key", "https://api.example.com/v1", "test-model");
        let provider = OpenAICompatibleProvider::new(config, "example").unwrap();

        let mut bias = HashMap::new();
        bias.insert("CREATE_FILE".to_string(), -100);
        let request = CompletionRequest::new("test-model", vec![AppMessage::user("hi")])
            .with_bias_map(bias)
            .with_cache_hint("task-1")
            .with_temperature(0.2);

        let api_request = provider.build_request(&request);
        assert_eq!(api_request.logit_bias.unwrap().get("CREATE_FILE"), Some(&-100));
        assert_eq!(api_request.user.as_deref(), Some("task-1"));
        assert_eq!(api_request.temperature, Some(0.2));
    }

    #[test]
    fn auth_header_absent_when_key_empty() {
        let config = OpenAICompatibleConfig::new("", "http://localhost:11434/v1", "llama3");
        let provider = OpenAICompatibleProvider::new(config, "ollama").unwrap();
        assert!(provider.auth_header().is_none());
    }

    #[test]
    fn context_overflow_detection_heuristic() {
        assert!(looks_like_context_overflow("This model's maximum context length is exceeded"));
        assert!(!looks_like_context_overflow("invalid api key"));
    }
}
