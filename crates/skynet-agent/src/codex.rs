//! Codex-style "Responses API" provider.
//!
//! Unlike the chat-completions shape in [`crate::openai`] (role/content
//! messages, `tool_calls` on the assistant message), this wire format sends
//! an `input` list of typed items and replays encrypted reasoning items
//! verbatim across turns so the backend can resume its own hidden
//! chain-of-thought. `ChatRequest::api_mode` is not read here — any host
//! that registers a [`CodexProvider`] slot is implicitly choosing responses
//! mode for that slot, the same way registering an [`crate::openai::OpenAiProvider`]
//! slot implies chat-completions mode.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use skynet_sessions::types::ReasoningItem;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};

pub struct CodexProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl CodexProvider {
    /// `base_url` should NOT include a trailing slash. Requests post to
    /// `{base_url}/v1/responses`.
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            provider_name: "codex".to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for CodexProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request(req);
        let url = format!("{}/v1/responses", self.base_url);

        debug!(model = %req.model, "sending request to Codex responses API");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Codex responses API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

/// Build a `/v1/responses` request body.
///
/// `store: false` and `include: ["reasoning.encrypted_content"]` are
/// mandatory here, not optional extras — without them the backend either
/// persists the turn server-side (which this codebase never wants, sessions
/// are owned by `skynet-sessions`) or omits the encrypted reasoning payload
/// needed to resume the chain on the next turn.
pub(crate) fn build_request(req: &ChatRequest) -> serde_json::Value {
    let input = if let Some(ref raw) = req.raw_messages {
        build_responses_input(raw)
    } else {
        req.messages
            .iter()
            .filter(|m| !matches!(m.role, crate::provider::Role::System))
            .map(|m| {
                serde_json::json!({
                    "role": role_str(&m.role),
                    "content": m.content,
                })
            })
            .collect()
    };

    let mut body = serde_json::json!({
        "model": req.model,
        "instructions": req.system,
        "input": input,
        "store": false,
        "include": ["reasoning.encrypted_content"],
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    if let Some(reasoning) = &req.reasoning {
        if reasoning.enabled {
            body["reasoning"] = serde_json::json!({ "effort": reasoning.effort });
        }
    }

    body
}

fn role_str(role: &crate::provider::Role) -> &'static str {
    match role {
        crate::provider::Role::User => "user",
        crate::provider::Role::Assistant => "assistant",
        crate::provider::Role::System => "system",
    }
}

/// Convert the shared Anthropic-style raw message list (the same
/// intermediate form [`crate::openai::convert_raw_message_to_openai`]
/// consumes) into a responses-mode `input` list.
///
/// Conversion rules:
/// - system messages are dropped (their content already went into
///   `instructions`)
/// - user messages are emitted verbatim
/// - assistant messages emit their `reasoning` blocks first (skipping any
///   with empty `encrypted_content`), then one `function_call` item per
///   `tool_use` block, in the order the LLM requested them. A lone text
///   block becomes a plain assistant message item.
/// - tool-result messages (anthropic's `tool_result` content blocks, sent
///   here under the `user` role) become `function_call_output` items
fn build_responses_input(raw: &[serde_json::Value]) -> Vec<serde_json::Value> {
    let mut out = Vec::new();

    for msg in raw {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        if role == "system" {
            continue;
        }

        let content = msg.get("content");
        if content.map(|c| c.is_string()).unwrap_or(true) {
            let text = content.and_then(|c| c.as_str()).unwrap_or("").to_string();
            out.push(serde_json::json!({ "role": role, "content": text }));
            continue;
        }

        let Some(blocks) = content.and_then(|c| c.as_array()) else {
            continue;
        };

        if role == "assistant" {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("reasoning") => {
                        let encrypted = block
                            .get("encrypted_content")
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        if encrypted.is_empty() {
                            continue;
                        }
                        out.push(serde_json::json!({
                            "type": "reasoning",
                            "id": block.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                            "encrypted_content": encrypted,
                        }));
                    }
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            out.push(serde_json::json!({
                                "role": "assistant",
                                "content": text,
                            }));
                        }
                    }
                    Some("tool_use") => {
                        out.push(serde_json::json!({
                            "type": "function_call",
                            "call_id": block.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                            "name": block.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                            "arguments": block
                                .get("input")
                                .cloned()
                                .unwrap_or(serde_json::json!({}))
                                .to_string(),
                        }));
                    }
                    _ => {}
                }
            }
            continue;
        }

        let has_tool_result = blocks
            .iter()
            .any(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"));
        if has_tool_result {
            for block in blocks {
                if block.get("type").and_then(|t| t.as_str()) != Some("tool_result") {
                    continue;
                }
                out.push(serde_json::json!({
                    "type": "function_call_output",
                    "call_id": block.get("tool_use_id").and_then(|v| v.as_str()).unwrap_or(""),
                    "output": block.get("content").and_then(|v| v.as_str()).unwrap_or(""),
                }));
            }
            continue;
        }

        // Plain content blocks — concatenate text, emit verbatim under role.
        let text: String = blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        out.push(serde_json::json!({ "role": role, "content": text }));
    }

    out
}

pub(crate) fn parse_response(resp: ApiResponse) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut reasoning_items = Vec::new();

    for item in &resp.output {
        match item.item_type.as_str() {
            "message" => {
                for part in &item.content {
                    if let Some(text) = &part.text {
                        content.push_str(text);
                    }
                }
            }
            "function_call" => {
                let call_id = item.call_id.clone().unwrap_or_default();
                let name = item.name.clone().unwrap_or_default();
                let input: serde_json::Value = item
                    .arguments
                    .as_deref()
                    .and_then(|a| serde_json::from_str(a).ok())
                    .unwrap_or_default();
                tool_calls.push(ToolCall {
                    id: call_id,
                    name,
                    input,
                });
            }
            "reasoning" => {
                reasoning_items.push(ReasoningItem {
                    kind: "reasoning".to_string(),
                    id: item.id.clone().unwrap_or_default(),
                    encrypted_content: item.encrypted_content.clone().unwrap_or_default(),
                });
            }
            _ => {}
        }
    }

    let stop_reason = if !tool_calls.is_empty() {
        "tool_use".to_string()
    } else {
        "end_turn".to_string()
    };

    // Codex reports turn status as "completed" | "in_progress" | "failed".
    // Anything short of "completed" is the mid-turn continuation case the
    // tool loop re-requests without a new user turn.
    let finish_reason = if resp.status == "completed" {
        None
    } else {
        Some("incomplete".to_string())
    };

    ChatResponse {
        content,
        model: resp.model,
        tokens_in: resp.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
        tokens_out: resp.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
        stop_reason,
        tool_calls,
        finish_reason,
        reasoning_details: None,
        codex_reasoning_items: if reasoning_items.is_empty() {
            None
        } else {
            Some(reasoning_items)
        },
    }
}

// Codex responses API response types (private — only used for deserialization).

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub(crate) model: String,
    /// "completed" | "incomplete" | "failed" — surfaced as `ChatResponse::finish_reason`.
    pub(crate) status: String,
    pub(crate) output: Vec<OutputItem>,
    pub(crate) usage: Option<Usage>,
}

#[derive(Deserialize)]
pub(crate) struct OutputItem {
    #[serde(rename = "type")]
    pub(crate) item_type: String,
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) content: Vec<OutputContentPart>,
    #[serde(default)]
    pub(crate) call_id: Option<String>,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) arguments: Option<String>,
    #[serde(default)]
    pub(crate) encrypted_content: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct OutputContentPart {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct Usage {
    pub(crate) input_tokens: u32,
    pub(crate) output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_system_messages_and_emits_user_verbatim() {
        let raw = vec![
            serde_json::json!({"role": "system", "content": "be terse"}),
            serde_json::json!({"role": "user", "content": "hi"}),
        ];
        let input = build_responses_input(&raw);
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["role"], "user");
        assert_eq!(input[0]["content"], "hi");
    }

    #[test]
    fn assistant_turn_emits_reasoning_before_function_call() {
        let raw = vec![serde_json::json!({
            "role": "assistant",
            "content": [
                {"type": "reasoning", "id": "r1", "encrypted_content": "abc"},
                {"type": "tool_use", "id": "call_1", "name": "read_file", "input": {"path": "x"}},
            ],
        })];
        let input = build_responses_input(&raw);
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["type"], "reasoning");
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[1]["call_id"], "call_1");
    }

    #[test]
    fn empty_encrypted_content_reasoning_is_skipped() {
        let raw = vec![serde_json::json!({
            "role": "assistant",
            "content": [
                {"type": "reasoning", "id": "r1", "encrypted_content": ""},
                {"type": "text", "text": "done"},
            ],
        })];
        let input = build_responses_input(&raw);
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["role"], "assistant");
        assert_eq!(input[0]["content"], "done");
    }

    #[test]
    fn tool_result_becomes_function_call_output() {
        let raw = vec![serde_json::json!({
            "role": "user",
            "content": [
                {"type": "tool_result", "tool_use_id": "call_1", "content": "ok", "is_error": false},
            ],
        })];
        let input = build_responses_input(&raw);
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["type"], "function_call_output");
        assert_eq!(input[0]["call_id"], "call_1");
        assert_eq!(input[0]["output"], "ok");
    }

    #[test]
    fn parse_response_maps_function_call_to_tool_use_stop_reason() {
        let resp = ApiResponse {
            model: "gpt-5-codex".to_string(),
            status: "completed".to_string(),
            output: vec![OutputItem {
                item_type: "function_call".to_string(),
                id: None,
                content: vec![],
                call_id: Some("call_1".to_string()),
                name: Some("bash".to_string()),
                arguments: Some("{\"cmd\":\"ls\"}".to_string()),
                encrypted_content: None,
            }],
            usage: None,
        };
        let parsed = parse_response(resp);
        assert_eq!(parsed.stop_reason, "tool_use");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "bash");
        assert_eq!(parsed.finish_reason, None);
    }

    #[test]
    fn parse_response_marks_in_progress_status_as_incomplete() {
        let resp = ApiResponse {
            model: "gpt-5-codex".to_string(),
            status: "in_progress".to_string(),
            output: vec![OutputItem {
                item_type: "message".to_string(),
                id: None,
                content: vec![OutputContentPart {
                    text: Some("thinking out loud".to_string()),
                }],
                call_id: None,
                name: None,
                arguments: None,
                encrypted_content: None,
            }],
            usage: None,
        };
        let parsed = parse_response(resp);
        assert_eq!(parsed.finish_reason.as_deref(), Some("incomplete"));
    }
}
