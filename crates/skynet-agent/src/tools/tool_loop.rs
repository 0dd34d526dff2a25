//! Tool execution loop — the core agentic behavior.
//!
//! Flow: prompt → LLM → if tool_use → execute tools → inject results → LLM → repeat
//! Stops when: stop_reason is not "tool_use", max iterations reached, `clarify`
//! is called, cancellation is requested, or an error occurs.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ToolCall};

use super::{Tool, ToolResult};

/// Default cap on tool loop iterations to prevent runaway agents.
/// Overridable per request via `ChatRequest::max_iterations`.
const DEFAULT_MAX_ITERATIONS: usize = 60;

/// Reply substituted for the final assistant turn when the loop runs out of
/// iterations without reaching a non-tool-use stop.
const ITERATION_LIMIT_REPLY: &str = "[Iteration limit reached]";

/// Run the full tool execution loop (non-streaming).
///
/// Starts from `initial_request`, which must have `messages` or `raw_messages` set.
/// Returns the final `ChatResponse` (the one with `stop_reason != "tool_use"`)
/// plus the ordered list of tool names that were called.
///
/// `cancel`, when set and triggered mid-loop, ends the turn after the
/// in-flight tool calls finish rather than starting another LLM round trip.
///
/// `session_id` scopes the three tools intercepted here ahead of normal
/// registry dispatch — `todo`, `memory_tool`, `clarify` — each of which needs
/// direct access to in-process, per-session state rather than just its own
/// call arguments.
pub async fn run_tool_loop(
    provider: &dyn LlmProvider,
    initial_request: ChatRequest,
    tools: &[Box<dyn Tool>],
    cancel: Option<&CancellationToken>,
    session_id: &str,
) -> Result<(ChatResponse, Vec<String>), crate::provider::ProviderError> {
    // Build initial raw JSON message list from the structured messages.
    let mut raw_messages: Vec<serde_json::Value> =
        if let Some(ref raw) = initial_request.raw_messages {
            raw.clone()
        } else {
            initial_request
                .messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
                .collect()
        };

    let mut last_response: Option<ChatResponse> = None;
    let mut called_tools: Vec<String> = Vec::new();
    let max_iterations = initial_request.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);

    let mut iteration = 0;
    while iteration < max_iterations {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            info!(iteration, "tool loop cancelled");
            break;
        }

        // Build the request for this iteration, injecting the full message history.
        let mut req = initial_request.clone();
        req.raw_messages = Some(raw_messages.clone());

        debug!(iteration, "tool loop iteration");

        let response = provider.send(&req).await?;

        // Responses-mode providers can return an interim turn with no tool
        // calls when the model hasn't finished reasoning yet
        // (`finish_reason: "incomplete"`), sometimes carrying partial text.
        // Record it in the transcript and re-request immediately rather than
        // waiting on a new user turn.
        if response.tool_calls.is_empty() && response.finish_reason.as_deref() == Some("incomplete")
        {
            info!(iteration, "tool loop continuing past incomplete turn");

            let mut interim_content: Vec<serde_json::Value> = Vec::new();
            for item in response.codex_reasoning_items.iter().flatten() {
                if item.encrypted_content.is_empty() {
                    continue;
                }
                interim_content.push(serde_json::json!({
                    "type": "reasoning",
                    "id": item.id,
                    "encrypted_content": item.encrypted_content,
                }));
            }
            if !response.content.is_empty() {
                interim_content.push(serde_json::json!({
                    "type": "text",
                    "text": response.content,
                }));
            }
            let mut interim_message = serde_json::json!({
                "role": "assistant",
                "content": interim_content,
                "finish_reason": "incomplete",
            });
            if let Some(details) = &response.reasoning_details {
                interim_message["reasoning_details"] = serde_json::Value::String(details.clone());
            }
            raw_messages.push(interim_message);

            last_response = Some(response);
            iteration += 1;
            continue;
        }

        if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
            info!(iteration, "tool loop complete — no more tool calls");
            return Ok((response, called_tools));
        }

        // Build the assistant turn content block list.
        // Reasoning items replay before their corresponding tool_use blocks,
        // any text content follows, then the tool_use blocks themselves.
        let mut assistant_content: Vec<serde_json::Value> = Vec::new();

        for item in response.codex_reasoning_items.iter().flatten() {
            if item.encrypted_content.is_empty() {
                continue;
            }
            assistant_content.push(serde_json::json!({
                "type": "reasoning",
                "id": item.id,
                "encrypted_content": item.encrypted_content,
            }));
        }

        if !response.content.is_empty() {
            assistant_content.push(serde_json::json!({
                "type": "text",
                "text": response.content,
            }));
        }

        for call in &response.tool_calls {
            assistant_content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }

        // Append the assistant message. `reasoning_details` rides alongside
        // the content blocks (not inside them) so chat-completions-mode
        // providers can round-trip the opaque payload unmodified.
        let mut assistant_message = serde_json::json!({
            "role": "assistant",
            "content": assistant_content,
        });
        if let Some(details) = &response.reasoning_details {
            assistant_message["reasoning_details"] = serde_json::Value::String(details.clone());
        }
        raw_messages.push(assistant_message);

        // Execute each tool call and collect results.
        let mut tool_result_content: Vec<serde_json::Value> = Vec::new();
        let mut clarify_asked: Option<String> = None;

        for call in &response.tool_calls {
            called_tools.push(call.name.clone());
            let result = execute_tool(tools, call, session_id).await;
            if call.name == super::clarify::NAME && !result.is_error {
                clarify_asked = Some(result.content.clone());
            }
            tool_result_content.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": result.content,
                "is_error": result.is_error,
            }));
        }

        // `clarify` ends the turn immediately: surface the question as the
        // final reply instead of feeding its result back to the LLM for
        // another round trip. The user's next message is the answer.
        if let Some(question) = clarify_asked {
            info!(iteration, "tool loop ended by clarify");
            return Ok((
                ChatResponse {
                    content: question,
                    tool_calls: Vec::new(),
                    stop_reason: "end_turn".to_string(),
                    ..response
                },
                called_tools,
            ));
        }

        // Append the user message containing all tool results.
        raw_messages.push(serde_json::json!({
            "role": "user",
            "content": tool_result_content,
        }));

        last_response = Some(response);
        iteration += 1;
    }

    if cancel.is_some_and(CancellationToken::is_cancelled) {
        if let Some(resp) = last_response {
            return Ok((resp, called_tools));
        }
        return Err(crate::provider::ProviderError::Unavailable(
            "tool loop cancelled before any response".to_string(),
        ));
    }

    warn!(max_iterations, "tool loop hit maximum iterations");

    // Synthesize a final reply rather than erroring out — the caller still
    // gets a turn to show the user, and the transcript records why it ended.
    let content = ITERATION_LIMIT_REPLY.to_string();
    let synthetic = match last_response {
        Some(resp) => ChatResponse {
            content,
            tool_calls: Vec::new(),
            stop_reason: "end_turn".to_string(),
            finish_reason: Some("iteration_limit".to_string()),
            ..resp
        },
        None => ChatResponse {
            content,
            model: initial_request.model.clone(),
            stop_reason: "end_turn".to_string(),
            finish_reason: Some("iteration_limit".to_string()),
            ..Default::default()
        },
    };
    Ok((synthetic, called_tools))
}

/// Dispatch one tool call. `todo`, `memory_tool`, and `clarify` are handled
/// directly here — in-process, scoped to `session_id` — ahead of the normal
/// by-name lookup in `tools`, which only holds their schema for LLM exposure.
async fn execute_tool(tools: &[Box<dyn Tool>], call: &ToolCall, session_id: &str) -> ToolResult {
    if call.name == super::todo::NAME {
        return super::todo::handle(session_id, &call.input);
    }
    if call.name == super::memory_tool::NAME {
        return super::memory_tool::handle(session_id, &call.input);
    }
    if call.name == super::clarify::NAME {
        return super::clarify::handle(&call.input);
    }

    match tools.iter().find(|t| t.name() == call.name) {
        Some(tool) => {
            debug!(tool = %call.name, "executing tool");
            tool.execute(call.input.clone()).await
        }
        None => ToolResult::error(format!("unknown tool: {}", call.name)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::provider::{Message, ProviderError, Role};

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            system: "You are a test.".to_string(),
            system_prompt: None,
            messages: vec![Message {
                role: Role::User,
                content: "hi".to_string(),
            }],
            max_tokens: 64,
            stream: false,
            thinking: None,
            tools: Vec::new(),
            raw_messages: None,
            ..ChatRequest::defaults()
        }
    }

    /// Answers with one `clarify` tool call on the first turn, then (if ever
    /// called again) a plain final reply — used to assert the loop never
    /// reaches the second turn.
    struct AsksToClarify {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for AsksToClarify {
        fn name(&self) -> &str {
            "asks-to-clarify"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(ChatResponse {
                    content: String::new(),
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "tool_use".to_string(),
                    tool_calls: vec![ToolCall {
                        id: "call_1".to_string(),
                        name: super::super::clarify::NAME.to_string(),
                        input: serde_json::json!({"question": "Which environment?"}),
                    }],
                    ..Default::default()
                })
            } else {
                Ok(ChatResponse {
                    content: "should never get here".to_string(),
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "end_turn".to_string(),
                    tool_calls: Vec::new(),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn clarify_ends_the_turn_without_a_second_round_trip() {
        let provider = AsksToClarify {
            calls: AtomicUsize::new(0),
        };
        let (resp, called) = run_tool_loop(&provider, request(), &[], None, "session-1")
            .await
            .unwrap();
        assert_eq!(resp.content, "Which environment?");
        assert_eq!(resp.stop_reason, "end_turn");
        assert_eq!(called, vec![super::super::clarify::NAME.to_string()]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    struct AlwaysDone;

    #[async_trait]
    impl LlmProvider for AlwaysDone {
        fn name(&self) -> &str {
            "always-done"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "done".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".to_string(),
                tool_calls: Vec::new(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn cancelled_before_first_iteration_returns_error_not_panic() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_tool_loop(&AlwaysDone, request(), &[], Some(&cancel), "session-2")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn todo_tool_is_intercepted_before_registry_lookup() {
        let response = ChatResponse {
            content: String::new(),
            model: "test-model".to_string(),
            tokens_in: 1,
            tokens_out: 1,
            stop_reason: "tool_use".to_string(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: super::super::todo::NAME.to_string(),
                input: serde_json::json!({}),
            }],
            ..Default::default()
        };
        let result = execute_tool(&[], &response.tool_calls[0], "session-3").await;
        assert!(!result.is_error);
    }

    /// First turn is "incomplete" with no tool calls but non-empty text —
    /// the loop must record it and re-request rather than treating it as
    /// the final reply or discarding its text.
    struct IncompleteThenDone {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for IncompleteThenDone {
        fn name(&self) -> &str {
            "incomplete-then-done"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                assert_eq!(req.raw_messages.as_ref().unwrap().len(), 1);
                Ok(ChatResponse {
                    content: "I'll inspect the repo structure first.".to_string(),
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "incomplete".to_string(),
                    tool_calls: Vec::new(),
                    finish_reason: Some("incomplete".to_string()),
                    ..Default::default()
                })
            } else {
                // The interim turn must have been appended before this
                // second request was made.
                let raw = req.raw_messages.as_ref().unwrap();
                assert_eq!(raw.len(), 2);
                assert_eq!(raw[1]["role"], "assistant");
                assert_eq!(raw[1]["finish_reason"], "incomplete");
                Ok(ChatResponse {
                    content: "done".to_string(),
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "end_turn".to_string(),
                    tool_calls: Vec::new(),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn incomplete_turn_with_text_is_recorded_and_loop_continues() {
        let provider = IncompleteThenDone {
            calls: AtomicUsize::new(0),
        };
        let (resp, _called) = run_tool_loop(&provider, request(), &[], None, "session-4")
            .await
            .unwrap();
        assert_eq!(resp.content, "done");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
