//! Non-streaming message pipeline — shared by all channel adapters.
//!
//! `process_message_non_streaming` runs the full agentic turn:
//! load transcript → build system prompt → build tools → tool loop →
//! append turns to the session store → mirror to sibling-platform sessions →
//! spawn compression → return `ProcessedMessage`.
//!
//! The caller only handles channel-specific formatting (WS frame, Discord
//! chunking, etc.). Everything else is here, once.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use skynet_core::types::ConversationKey;
use skynet_sessions::types::Role as SessionRole;

use crate::provider::{ChatRequest, Message, ProviderError, Role};
use crate::tools::tool_loop;

use super::compact::compress_session_if_needed;
use super::context::MessageContext;

/// Result of a completed non-streaming pipeline turn.
pub struct ProcessedMessage {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// Resolve `session_key` to a [`ConversationKey`], tolerating callers that
/// still pass a bare chat ID rather than the full `conv:platform:chat_id` form.
pub fn resolve_conversation_key(session_key: &str, channel_name: &str) -> ConversationKey {
    let candidate = ConversationKey(session_key.to_string());
    if candidate.parse().is_some() {
        candidate
    } else {
        ConversationKey::new(channel_name, session_key, None)
    }
}

/// Run the full non-streaming message pipeline for any channel adapter.
///
/// Steps:
/// 1. Resolve (or create) the session for this conversation and load its transcript.
/// 2. Build the system prompt (optionally injecting user memory context).
/// 3. Build the tool list using the context's terminal/memory subsystems.
/// 4. Run `tool_loop::run_tool_loop` (LLM → tool calls → results → LLM → …).
/// 5. Append the user and assistant turns to the session store.
/// 6. Mirror the assistant turn into this user's active session on every
///    other connected platform.
/// 7. Spawn `compress_session_if_needed` (fire-and-forget).
/// 8. Return `ProcessedMessage`.
///
/// # Arguments
/// - `ctx` — shared host context (gateway `AppState`, discord `Arc<C>`, etc.)
/// - `session_key` — conversation key for this user/channel conversation
/// - `channel_name` — label stored alongside the session (e.g. `"discord"`)
/// - `content` — the user's message text
/// - `user_context` — optional pre-rendered user memory context string
/// - `model_override` — optional per-request model ID (overrides runtime default)
/// - `channel_id` — optional channel ID for reminder delivery (Discord: `ChannelId.get()`, WS: `None`)
/// - `cancel` — optional cancellation token; when cancelled the tool loop exits early
/// - `attachment_blocks` — optional multimodal content blocks (images, files) to append
///   to the user turn. When `Some`, the pipeline uses `raw_messages` to pass structured
///   content blocks to the LLM instead of plain text messages.
/// - `user_id` — the acting user's Skynet ID, for per-user attribution on
///   shared group/channel sessions; never part of the conversation key itself.
#[allow(clippy::too_many_arguments)]
pub async fn process_message_non_streaming<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    session_key: &str,
    channel_name: &str,
    content: &str,
    user_context: Option<&str>,
    model_override: Option<&str>,
    channel_id: Option<u64>,
    cancel: Option<CancellationToken>,
    attachment_blocks: Option<Vec<serde_json::Value>>,
    user_id: Option<&str>,
) -> Result<ProcessedMessage, ProviderError> {
    let key = resolve_conversation_key(session_key, channel_name);
    let session = ctx
        .sessions()
        .get_or_create(&key, channel_name)
        .map_err(|e| ProviderError::Unavailable(format!("session store: {e}")))?;
    if let Some(uid) = user_id {
        let _ = ctx.sessions().set_user_if_absent(&session.id, uid);
    }

    if let Some(hooks) = ctx.hooks() {
        let hooks = Arc::clone(hooks);
        let payload = serde_json::json!({
            "channel": channel_name,
            "session_key": session_key,
        });
        let is_new_session = session.message_count == 0;
        tokio::spawn(async move {
            if is_new_session {
                hooks.emit("session:start", payload.clone()).await;
            }
            hooks.emit("agent:start", payload).await
        });
    }

    // Build tools — includes execute_command, bash PTY session, reminder scheduling, skills.
    let built = crate::tools::build::build_tools(
        Arc::clone(ctx),
        channel_name,
        channel_id,
        Some(session_key),
    );
    let tool_defs = crate::tools::build::tool_definitions(&built.tools);

    // Build system prompt, optionally enriched with user memory context.
    // Include session info so the LLM knows the current time and turn count.
    let now = chrono::Utc::now();
    let session_info = crate::prompt::SessionInfo {
        session_key: session_key.to_string(),
        turn_count: session.message_count,
        timestamp: now.format("%Y-%m-%d %H:%M UTC").to_string(),
    };
    let prompt_builder = ctx.agent().prompt().await;
    let mut system_prompt = prompt_builder.build_prompt(user_context, Some(&session_info));

    // Inject the top 5 hot knowledge topics into the volatile tier.
    // Derived from tool call frequency over the last 30 days — transparent to the AI.
    let top_tools = ctx.memory().get_top_tools(30, 20).unwrap_or_default();
    let hot_topics = ctx
        .memory()
        .get_hot_topics(&top_tools, 5)
        .unwrap_or_default();
    if !hot_topics.is_empty() {
        let mut hot_str = String::from(
            "\n\n## Knowledge index (top topics — use knowledge_search for full details)\n",
        );
        for entry in &hot_topics {
            hot_str.push_str(&format!("- {} [{}]\n", entry.topic, entry.tags));
        }
        system_prompt.volatile_tier.push_str(&hot_str);
    }

    // Inject skill index into the volatile tier (if any skills are loaded).
    if !built.skill_index.is_empty() {
        system_prompt.volatile_tier.push_str(&built.skill_index);
    }

    let plain = system_prompt.to_plain_text();

    // Resolve the model: per-request override takes priority over runtime default.
    let model = match model_override {
        Some(m) => m.to_string(),
        None => ctx.agent().get_model().await,
    };

    // Load the stored transcript and append the current user turn. Only
    // system/user/assistant turns are replayed as plain messages here — tool
    // calls made within a single turn's tool loop stay ephemeral to that
    // turn and are not persisted to the session store.
    let transcript = ctx
        .sessions()
        .load_transcript(&session.id)
        .map_err(|e| ProviderError::Unavailable(format!("session store: {e}")))?;
    let mut messages: Vec<Message> = transcript
        .messages
        .iter()
        .filter(|m| m.role != SessionRole::Tool)
        .map(|m| {
            let is_assistant = m.role == SessionRole::Assistant;
            let content = if is_assistant {
                m.content.clone()
            } else {
                format_envelope(channel_name, &m.created_at, &m.content)
            };
            Message {
                role: if is_assistant { Role::Assistant } else { Role::User },
                content,
            }
        })
        .collect();

    messages.push(Message {
        role: Role::User,
        content: format_envelope(channel_name, &now.to_rfc3339(), content),
    });

    // When multimodal content blocks are provided (e.g. images from Discord),
    // switch to raw_messages so the LLM receives structured content blocks
    // instead of plain text for the user turn.
    let raw_messages = attachment_blocks.map(|blocks| {
        let mut raw: Vec<serde_json::Value> = transcript
            .messages
            .iter()
            .filter(|m| m.role != SessionRole::Tool)
            .map(|m| serde_json::json!({ "role": m.role.to_string(), "content": m.content }))
            .collect();
        let mut content_parts: Vec<serde_json::Value> = vec![serde_json::json!({
            "type": "text",
            "text": format_envelope(channel_name, &now.to_rfc3339(), content)
        })];
        content_parts.extend(blocks);
        raw.push(serde_json::json!({ "role": "user", "content": content_parts }));
        raw
    });

    let request = ChatRequest {
        model,
        system: plain,
        system_prompt: Some(system_prompt),
        messages: if raw_messages.is_some() {
            Vec::new()
        } else {
            messages
        },
        max_tokens: 4096,
        stream: false,
        thinking: None,
        tools: tool_defs,
        raw_messages,
        ..ChatRequest::defaults()
    };

    let (r, called_tools) = tool_loop::run_tool_loop(
        ctx.agent().provider(),
        request,
        &built.tools,
        cancel.as_ref(),
        &session.id,
    )
    .await?;

    // Transparently log every tool call for usage frequency tracking.
    for tool_name in &called_tools {
        let _ = ctx.memory().log_tool_call(tool_name, session_key);
    }

    info!(
        tokens_in = r.tokens_in,
        tokens_out = r.tokens_out,
        model = %r.model,
        session = %session_key,
        "pipeline: chat complete"
    );

    // Persist both turns to the session store for future history.
    if !r.content.is_empty() {
        let _ = ctx
            .sessions()
            .append_message(&session.id, SessionRole::User, content, None, None, None, None);
        let _ = ctx.sessions().append_message_full(
            &session.id,
            SessionRole::Assistant,
            &r.content,
            None,
            None,
            None,
            Some(r.tokens_out),
            r.finish_reason.as_deref(),
            r.reasoning_details.as_deref(),
            r.codex_reasoning_items.as_deref(),
        );

        // Mirror: copy this assistant turn into the user's active session on
        // every other connected platform, tagged so it never re-enters the
        // pipeline and never counts toward that session's message_count.
        let mirror_user_id = session.user_id.clone().or_else(|| user_id.map(str::to_string));
        if let Some(uid) = mirror_user_id {
            match ctx.sessions().find_mirror_targets(&uid, channel_name) {
                Ok(targets) => {
                    for target in targets {
                        if let Err(e) = ctx.sessions().append_mirror_message(&target.id, &r.content) {
                            warn!(error = %e, target_session = %target.id, "mirror append failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, user_id = %uid, "mirror target lookup failed"),
            }
        }

        // Fire-and-forget: compress if the session has grown too long.
        let ctx_clone = Arc::clone(ctx);
        let sid = session.id.clone();
        let tokens_in = r.tokens_in;
        let tokens_out = r.tokens_out;
        tokio::spawn(async move {
            compress_session_if_needed(ctx_clone, sid, tokens_in, tokens_out).await;
        });
    }

    if let Some(hooks) = ctx.hooks() {
        let hooks = Arc::clone(hooks);
        let payload = serde_json::json!({
            "channel": channel_name,
            "session_key": session_key,
            "tokens_in": r.tokens_in,
            "tokens_out": r.tokens_out,
            "stop_reason": r.stop_reason,
        });
        tokio::spawn(async move { hooks.emit("agent:end", payload).await });
    }

    Ok(ProcessedMessage {
        content: r.content,
        model: r.model,
        tokens_in: r.tokens_in,
        tokens_out: r.tokens_out,
        stop_reason: r.stop_reason,
    })
}

/// Wrap a message with a timestamp envelope.
///
/// Format: `[channel YYYY-MM-DD HH:MM UTC] content`
///
/// If the timestamp can't be parsed, the raw content is returned unchanged.
/// Assistant messages are returned as-is (no envelope) to avoid confusion.
fn format_envelope(channel: &str, created_at: &str, content: &str) -> String {
    // Parse RFC3339 timestamp and format as human-readable.
    match chrono::DateTime::parse_from_rfc3339(created_at) {
        Ok(dt) => {
            let utc = dt.with_timezone(&chrono::Utc);
            format!(
                "[{} {}] {}",
                channel,
                utc.format("%Y-%m-%d %H:%M UTC"),
                content
            )
        }
        Err(_) => content.to_string(),
    }
}

