//! Context compressor — threshold-triggered transcript windowing.
//!
//! Stateless except for a handful of running counters. When a session's
//! transcript grows past `threshold_ratio * context_window_tokens`, the
//! middle of the transcript is collapsed into a single `[CONTEXT SUMMARY]:`
//! system message produced by a cheap auxiliary model, while the first and
//! last `protect_*_n` messages are kept verbatim. Tool-call/tool-result
//! pairs are never split: a tool-result message whose matching tool-call
//! fell inside the summarized middle is dropped along with it.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use skynet_sessions::types::{Message, Role};

use crate::provider::{
    ChatRequest, LlmProvider, Message as ProviderMessage, Role as ProviderRole,
};

use super::context::MessageContext;

/// Claude-class long-context window, used when no per-model figure is known.
const DEFAULT_CONTEXT_WINDOW_TOKENS: u32 = 180_000;

#[derive(Debug, Clone)]
pub struct CompressorConfig {
    pub context_window_tokens: u32,
    /// Fraction of the context window that triggers compression.
    pub threshold_ratio: f64,
    /// Messages kept verbatim from the start of the transcript (system + first user turn).
    pub protect_first_n: usize,
    /// Messages kept verbatim from the end of the transcript (most recent exchange).
    pub protect_last_n: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            context_window_tokens: DEFAULT_CONTEXT_WINDOW_TOKENS,
            threshold_ratio: 0.85,
            protect_first_n: 2,
            protect_last_n: 2,
        }
    }
}

/// Snapshot returned by [`ContextCompressor::get_status`] for diagnostics tools.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompressorStatus {
    pub last_prompt_tokens: u32,
    pub last_completion_tokens: u32,
    pub last_total_tokens: u32,
    pub compression_count: u32,
    pub context_window_tokens: u32,
    pub threshold_ratio: f64,
}

/// Per-session compression state. One instance per active session; cheap to
/// construct, carries no handles of its own.
#[derive(Debug, Clone)]
pub struct ContextCompressor {
    config: CompressorConfig,
    last_prompt_tokens: u32,
    last_completion_tokens: u32,
    last_total_tokens: u32,
    compression_count: u32,
}

impl ContextCompressor {
    pub fn new(config: CompressorConfig) -> Self {
        Self {
            config,
            last_prompt_tokens: 0,
            last_completion_tokens: 0,
            last_total_tokens: 0,
            compression_count: 0,
        }
    }

    /// Record token usage from the most recent provider response.
    pub fn update_from_response(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        self.last_prompt_tokens = prompt_tokens;
        self.last_completion_tokens = completion_tokens;
        self.last_total_tokens = prompt_tokens + completion_tokens;
    }

    /// True when the live prompt-token count (if known) or the estimated size
    /// of `messages` exceeds `threshold_ratio * context_window_tokens`.
    pub fn should_compress(&self, prompt_tokens: Option<u32>, messages: &[Message]) -> bool {
        let estimate = prompt_tokens
            .filter(|&t| t > 0)
            .unwrap_or_else(|| estimate_tokens(messages));
        estimate as f64 >= self.config.threshold_ratio * self.config.context_window_tokens as f64
    }

    /// Collapse the middle of `messages`, keeping the first/last N verbatim.
    ///
    /// `summarizer` is the auxiliary model to call for the summary; when
    /// `None`, the middle is replaced with a plain truncation notice instead
    /// of an LLM-produced summary.
    pub async fn compress(
        &mut self,
        messages: Vec<Message>,
        summarizer: Option<&dyn LlmProvider>,
        summarizer_model: &str,
        todo_snapshot: Option<&str>,
    ) -> Vec<Message> {
        let n = messages.len();
        let protect_first = self.config.protect_first_n.min(n);
        let protect_last = self.config.protect_last_n.min(n.saturating_sub(protect_first));
        if protect_first + protect_last >= n {
            // Nothing in the middle to collapse.
            return messages;
        }

        let first = &messages[..protect_first];
        let middle = &messages[protect_first..n - protect_last];
        let last = &messages[n - protect_last..];

        let mut summary_text = match summarizer {
            Some(provider) => summarize_middle(provider, summarizer_model, middle).await,
            None => format!(
                "[CONTEXT SUMMARY]: {} earlier messages truncated (no auxiliary model configured).",
                middle.len()
            ),
        };
        if let Some(todo) = todo_snapshot {
            if !todo.trim().is_empty() {
                summary_text.push_str("\n\n");
                summary_text.push_str(todo);
            }
        }

        let session_id = messages
            .first()
            .map(|m| m.session_id.clone())
            .unwrap_or_default();
        let summary_message = Message {
            id: 0,
            session_id,
            role: Role::System,
            content: summary_text,
            tool_call_id: None,
            tool_calls: None,
            tool_name: None,
            token_count: None,
            finish_reason: None,
            reasoning_details: None,
            codex_reasoning_items: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let mut out = Vec::with_capacity(protect_first + 1 + protect_last);
        out.extend_from_slice(first);
        out.push(summary_message);
        out.extend_from_slice(last);

        // A tool-result message only survives if its matching tool-call is
        // still present. Calls that were themselves in the summarized
        // middle take their results down with them.
        let valid_call_ids: HashSet<&str> = out
            .iter()
            .filter_map(|m| m.tool_calls.as_ref())
            .flat_map(|calls| calls.iter().map(|c| c.id.as_str()))
            .collect();
        out.retain(|m| {
            m.role != Role::Tool
                || m
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| valid_call_ids.contains(id))
        });

        self.compression_count += 1;
        out
    }

    pub fn get_status(&self) -> CompressorStatus {
        CompressorStatus {
            last_prompt_tokens: self.last_prompt_tokens,
            last_completion_tokens: self.last_completion_tokens,
            last_total_tokens: self.last_total_tokens,
            compression_count: self.compression_count,
            context_window_tokens: self.config.context_window_tokens,
            threshold_ratio: self.config.threshold_ratio,
        }
    }
}

/// `ceil(total_chars / 4)` heuristic, used when no exact token count is available.
pub fn estimate_tokens(messages: &[Message]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    (chars as f64 / 4.0).ceil() as u32
}

async fn summarize_middle(provider: &dyn LlmProvider, model: &str, middle: &[Message]) -> String {
    let transcript: String = middle
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let req = ChatRequest {
        model: model.to_string(),
        system: concat!(
            "Summarize the conversation turns below concisely, preserving decisions, ",
            "facts, and commitments either party made. Plain prose, no preamble, no headings."
        )
        .to_string(),
        system_prompt: None,
        messages: vec![ProviderMessage {
            role: ProviderRole::User,
            content: format!("Summarize these turns:\n\n{transcript}"),
        }],
        max_tokens: 512,
        stream: false,
        thinking: None,
        tools: Vec::new(),
        raw_messages: None,
        ..ChatRequest::defaults()
    };

    match provider.send(&req).await {
        Ok(resp) => format!("[CONTEXT SUMMARY]: {}", resp.content.trim()),
        Err(e) => {
            warn!(error = %e, "compressor: summarization call failed, using stub");
            format!(
                "[CONTEXT SUMMARY]: {} earlier messages omitted (summarization failed).",
                middle.len()
            )
        }
    }
}

/// Compress a session's transcript in place, if it has grown past threshold.
///
/// Fire-and-forget: called from the pipeline after each turn via
/// `tokio::spawn`. Failures are logged and swallowed — a skipped compression
/// just means the next turn's request is a little larger.
pub async fn compress_session_if_needed<C: MessageContext + 'static>(
    ctx: Arc<C>,
    session_id: String,
    last_prompt_tokens: u32,
    last_completion_tokens: u32,
) {
    let transcript = match ctx.sessions().load_transcript(&session_id) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, session_id = %session_id, "compressor: load_transcript failed");
            return;
        }
    };

    let mut compressor = ContextCompressor::new(CompressorConfig::default());
    compressor.update_from_response(last_prompt_tokens, last_completion_tokens);

    if !compressor.should_compress(Some(last_prompt_tokens), &transcript.messages) {
        return;
    }

    let before = transcript.messages.len();
    info!(
        session_id = %session_id,
        messages = before,
        "compressor: threshold reached, collapsing transcript"
    );

    let model = ctx.agent().get_model().await;
    let todo_snapshot = crate::tools::todo::render(&session_id);
    let todo_arg = if todo_snapshot.is_empty() {
        None
    } else {
        Some(todo_snapshot.as_str())
    };
    let compressed = compressor
        .compress(transcript.messages, Some(ctx.agent().provider()), &model, todo_arg)
        .await;
    let after = compressed.len();

    if let Err(e) = ctx.sessions().rewrite_transcript(&session_id, &compressed) {
        warn!(error = %e, session_id = %session_id, "compressor: rewrite_transcript failed");
        return;
    }

    info!(
        session_id = %session_id,
        before,
        after,
        compressions = compressor.get_status().compression_count,
        "compressor: transcript compressed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message {
            id: 0,
            session_id: "s1".to_string(),
            role,
            content: content.to_string(),
            tool_call_id: None,
            tool_calls: None,
            tool_name: None,
            token_count: None,
            finish_reason: None,
            reasoning_details: None,
            codex_reasoning_items: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn tool_call(id: &str) -> skynet_sessions::types::ToolCall {
        skynet_sessions::types::ToolCall {
            id: id.to_string(),
            name: "terminal".to_string(),
            arguments_json: "{}".to_string(),
        }
    }

    #[test]
    fn should_compress_fires_past_threshold() {
        let compressor = ContextCompressor::new(CompressorConfig {
            context_window_tokens: 1000,
            threshold_ratio: 0.85,
            protect_first_n: 2,
            protect_last_n: 2,
        });
        assert!(compressor.should_compress(Some(900), &[]));
        assert!(!compressor.should_compress(Some(100), &[]));
    }

    #[tokio::test]
    async fn compress_without_summarizer_keeps_boundaries() {
        let mut compressor = ContextCompressor::new(CompressorConfig::default());
        let messages: Vec<Message> = (0..10)
            .map(|i| msg(Role::User, &format!("turn {i}")))
            .collect();
        let out = compressor.compress(messages, None, "haiku", None).await;
        // first 2 + summary + last 2
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].content, "turn 0");
        assert!(out[2].content.starts_with("[CONTEXT SUMMARY]:"));
        assert_eq!(out[2].role, Role::System);
        assert_eq!(out[4].content, "turn 9");
        assert_eq!(compressor.get_status().compression_count, 1);
    }

    #[tokio::test]
    async fn compress_drops_orphaned_tool_result() {
        let mut compressor = ContextCompressor::new(CompressorConfig {
            context_window_tokens: 1000,
            threshold_ratio: 0.85,
            protect_first_n: 1,
            protect_last_n: 2,
        });
        let mut messages = vec![msg(Role::System, "system prompt")];
        let mut with_call = msg(Role::Assistant, "");
        with_call.tool_calls = Some(vec![tool_call("call_1")]);
        messages.push(with_call); // falls into the middle, gets summarized away
        for i in 0..5 {
            messages.push(msg(Role::User, &format!("filler {i}")));
        }
        let mut orphan_result = msg(Role::Tool, "result");
        orphan_result.tool_call_id = Some("call_1".to_string());
        messages.push(orphan_result); // would be in protect_last_n
        messages.push(msg(Role::Assistant, "done"));

        let out = compressor.compress(messages, None, "haiku", None).await;
        assert!(out.iter().all(|m| m.role != Role::Tool));
    }

    #[tokio::test]
    async fn compress_appends_todo_snapshot_after_summary() {
        let mut compressor = ContextCompressor::new(CompressorConfig::default());
        let messages: Vec<Message> = (0..10)
            .map(|i| msg(Role::User, &format!("turn {i}")))
            .collect();
        let out = compressor
            .compress(messages, None, "haiku", Some("- [ ] finish feature X"))
            .await;
        let summary = out.iter().find(|m| m.role == Role::System).unwrap();
        assert!(summary.content.contains("finish feature X"));
    }

    #[test]
    fn estimate_tokens_uses_char_heuristic() {
        let messages = vec![msg(Role::User, "12345678")];
        assert_eq!(estimate_tokens(&messages), 2);
    }
}
