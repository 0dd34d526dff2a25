use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prompt::SystemPrompt;
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;

/// Classification of a provider's authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Plain API key (e.g. `sk-...`).
    ApiKey,
    /// OAuth access token with refresh capability.
    OAuth,
    /// Token exchanged from another credential (e.g. Copilot).
    Exchange,
    /// No authentication needed (e.g. local Ollama).
    None,
}

/// Snapshot of a provider's current authentication state.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub token_type: TokenType,
    /// Unix timestamp (seconds) when the token expires. `None` if unknown.
    pub expires_at: Option<i64>,
    /// Whether the provider can automatically refresh its credentials.
    pub refreshable: bool,
}

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Which wire shape a provider speaks.
///
/// `ChatCompletions` is the OpenAI-style `messages`/`tool_calls` shape shared
/// by Anthropic, OpenAI, and every OpenAI-compatible provider in
/// [`crate::registry`]. `Responses` is the Codex-style `input`/`instructions`
/// shape that replays encrypted reasoning items across turns. A provider
/// declares its own mode; `ChatRequest::api_mode` only affects providers
/// (like the Codex responses provider) whose request construction branches
/// on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiMode {
    #[default]
    ChatCompletions,
    Responses,
}

/// Reasoning-effort request, shape differs by `ApiMode`: an OpenRouter
/// `extra_body` flag in chat-completions mode, a required `reasoning.effort`
/// field in responses mode.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub enabled: bool,
    /// "low" | "medium" | "high" — provider-specific vocabulary, passed through.
    pub effort: String,
}

/// OpenRouter provider-routing preferences, sent under `extra_body.provider`
/// in chat-completions mode. Ignored by providers that don't support it.
#[derive(Debug, Clone, Default)]
pub struct ProviderRouting {
    pub sort: Option<String>,
    pub only: Vec<String>,
    pub ignore: Vec<String>,
    pub order: Vec<String>,
    pub require_parameters: bool,
    pub data_collection: Option<String>,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Plain text system prompt (used by non-Anthropic providers).
    pub system: String,
    /// Optional 3-tier prompt with cache breakpoints (Anthropic only).
    pub system_prompt: Option<SystemPrompt>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub stream: bool,
    /// Optional thinking level for extended reasoning (Anthropic only).
    /// `None` and `Some(ThinkingLevel::Off)` both disable the thinking block.
    pub thinking: Option<ThinkingLevel>,
    /// Tools to expose to the LLM. Empty by default (backward compatible).
    pub tools: Vec<ToolDefinition>,
    /// Raw JSON messages for the tool loop (overrides `messages` when set).
    /// This allows the tool loop to build structured content blocks
    /// (tool_use, tool_result) that can't be represented as plain strings.
    pub raw_messages: Option<Vec<serde_json::Value>>,
    /// Wire shape this request is meant to be sent in. Providers that only
    /// speak one shape ignore this; the Codex responses provider reads it.
    pub api_mode: ApiMode,
    /// Reasoning-effort request, if the caller wants extended reasoning.
    pub reasoning: Option<ReasoningConfig>,
    /// OpenRouter provider-routing preferences (chat-completions mode only).
    pub provider_routing: Option<ProviderRouting>,
    /// Overrides the tool loop's default iteration cap (60) when set.
    pub max_iterations: Option<usize>,
}

impl ChatRequest {
    /// Construct with every extension field at its default — existing call
    /// sites that build a `ChatRequest` with a struct literal can spread
    /// `..ChatRequest::defaults()` instead of listing each new field.
    pub fn defaults() -> Self {
        Self {
            model: String::new(),
            system: String::new(),
            system_prompt: None,
            messages: Vec::new(),
            max_tokens: 4096,
            stream: false,
            thinking: None,
            tools: Vec::new(),
            raw_messages: None,
            api_mode: ApiMode::default(),
            reasoning: None,
            provider_routing: None,
            max_iterations: None,
        }
    }
}

/// Response from an LLM provider (non-streaming).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    /// Canonical stop signal the tool loop checks (`"tool_use"` vs anything
    /// else). Providers normalize their own vocabulary into this.
    pub stop_reason: String,
    /// Tool calls requested by the LLM. Empty when no tools are called.
    pub tool_calls: Vec<ToolCall>,
    /// Raw provider finish/status field, kept distinct from `stop_reason`.
    /// Used to detect the responses-mode `"incomplete"` continuation case
    /// (no tool calls, no text — re-request without a new user turn).
    pub finish_reason: Option<String>,
    /// Opaque reasoning payload to round-trip unmodified on the next request
    /// (chat-completions mode, e.g. OpenRouter's `reasoning_details`).
    pub reasoning_details: Option<String>,
    /// Encrypted reasoning items to replay before their corresponding
    /// `function_call` entries on the next responses-mode request.
    pub codex_reasoning_items: Option<Vec<skynet_sessions::types::ReasoningItem>>,
}

/// Common interface for all LLM providers (Anthropic, OpenAI, Ollama, etc).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream response events through a channel.
    /// Default: falls back to non-streaming send, emits TextDelta + Done.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        let _ = tx.send(StreamEvent::TextDelta { text: resp.content }).await;
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model,
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: resp.stop_reason,
            })
            .await;
        Ok(())
    }

    /// Return current authentication state. Providers without tokens return `None`.
    fn token_info(&self) -> Option<TokenInfo> {
        None
    }

    /// Attempt to refresh authentication credentials.
    /// Providers that don't support refresh return `Ok(())` (no-op).
    async fn refresh_auth(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}
