//! Slack event/command handlers, run for every Socket Mode envelope.

use std::sync::Arc;

use tracing::warn;

use skynet_core::config::SlackConfig;

use crate::allow;
use crate::attach;
use crate::context::SlackAppContext;
use crate::send;

/// Handle a single `message` event from the Events API payload.
///
/// Runs for every incoming message envelope. Performs:
/// 1. Bot-message / edit-delete subtype filter
/// 2. Allowlist check (deny-by-default)
/// 3. DM guard
/// 4. `require_mention` guard for channels
/// 5. User resolution via `UserResolver`
/// 6. Session key construction
/// 7. Slash command interception (plain `/verb` text, not the `/hermes` command)
/// 8. Attachment extraction
/// 9. Non-blocking LLM pipeline invocation
pub async fn handle_message_event<C: SlackAppContext + 'static>(
    event: serde_json::Value,
    ctx: Arc<C>,
    config: SlackConfig,
    http: reqwest::Client,
    bot_user_id: Option<String>,
) {
    let event = &event;
    // 1. Ignore bot messages and edit/delete subtypes.
    if event.get("bot_id").is_some() {
        return;
    }
    let subtype = event["subtype"].as_str().unwrap_or("");
    if subtype == "message_changed" || subtype == "message_deleted" {
        return;
    }

    let user_id = event["user"].as_str().unwrap_or("").to_string();
    let channel_id = event["channel"].as_str().unwrap_or("").to_string();
    if user_id.is_empty() || channel_id.is_empty() {
        return;
    }

    // 2. Allowlist check.
    if !allow::is_allowed(&config.allow_users, &user_id) {
        return;
    }

    let channel_type = event["channel_type"].as_str().unwrap_or("");
    let is_dm = channel_type == "im";

    // 3. DM guard.
    if is_dm && !config.dm_allowed {
        return;
    }

    let mut text = event["text"].as_str().unwrap_or("").to_string();

    // 4. require_mention guard, and mention stripping, for channel messages.
    if !is_dm {
        if config.require_mention {
            let Some(bot_id) = &bot_user_id else { return };
            let mention = format!("<@{bot_id}>");
            if !text.contains(&mention) {
                return;
            }
        }
        if let Some(bot_id) = &bot_user_id {
            text = text.replace(&format!("<@{bot_id}>"), "").trim().to_string();
        }
    }

    // 5. Resolve Slack user to Skynet user ID.
    let skynet_uid = match ctx.users().resolve("slack", &user_id) {
        Ok(resolved) => resolved.user().id.clone(),
        Err(_) => user_id.clone(),
    };

    // 6. Build the conversation key from channel (+ thread, if replying
    //    inside one) — never the acting user, so every poster in a
    //    channel/thread shares the one session that key owns.
    let ts = event["ts"].as_str().unwrap_or("");
    let thread_ts = event["thread_ts"].as_str().filter(|t| *t != ts);
    let session_key = skynet_core::types::ConversationKey::new("slack", &channel_id, thread_ts)
        .as_str()
        .to_string();

    // 7. Slash command interception (plain-text `/verb`, distinct from the
    //    registered `/hermes` Slack command handled in `handle_slash_command`).
    if text.starts_with('/') {
        if let Some(response) =
            skynet_agent::pipeline::slash::handle_slash_command(&text, &session_key, "slack", &ctx)
                .await
        {
            send::send_response(&http, &config.bot_token, &channel_id, thread_ts, &response).await;
            return;
        }
        if let Some(response) = handle_local_command(&text, &ctx, &session_key).await {
            send::send_response(&http, &config.bot_token, &channel_id, thread_ts, &response).await;
            return;
        }
    }

    let files = event["files"].as_array().cloned().unwrap_or_default();
    if text.is_empty() && files.is_empty() {
        return;
    }

    let attachment_blocks = if files.is_empty() {
        None
    } else {
        Some(attach::to_content_blocks(&http, &config.bot_token, &files, config.max_attachment_bytes).await)
    };

    let text_for_pipeline = if text.is_empty() {
        "[User sent attachment(s)]".to_string()
    } else {
        text
    };

    // 8/9. Spawn the LLM pipeline in a separate task (non-blocking).
    let ctx2 = Arc::clone(&ctx);
    let http2 = http.clone();
    let bot_token = config.bot_token.clone();
    let channel_id2 = channel_id.clone();
    let session_key2 = session_key.clone();
    let thread_ts2 = thread_ts.map(str::to_string);

    tokio::spawn(async move {
        use skynet_agent::pipeline::process_message_non_streaming;

        let result = process_message_non_streaming(
            &ctx2,
            &session_key2,
            "slack",
            &text_for_pipeline,
            None,
            None,
            None,
            None,
            attachment_blocks,
            Some(&skynet_uid),
        )
        .await;

        match result {
            Ok(pm) => {
                send::send_response(&http2, &bot_token, &channel_id2, thread_ts2.as_deref(), &pm.content)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, session = %session_key2, "Slack: LLM pipeline failed");
                send::send_response(
                    &http2,
                    &bot_token,
                    &channel_id2,
                    thread_ts2.as_deref(),
                    &format!("⚠️ Error: {e}"),
                )
                .await;
            }
        }
    });
}

/// Handle a `/hermes` slash command invocation.
///
/// Slash commands arrive outside any thread, so replies are DM-like and
/// never threaded.
pub async fn handle_slash_command_event<C: SlackAppContext + 'static>(
    command: serde_json::Value,
    ctx: Arc<C>,
    config: SlackConfig,
    http: reqwest::Client,
) {
    let command = &command;
    let user_id = command["user_id"].as_str().unwrap_or("").to_string();
    let channel_id = command["channel_id"].as_str().unwrap_or("").to_string();
    let raw_text = command["text"].as_str().unwrap_or("");

    if !allow::is_allowed(&config.allow_users, &user_id) {
        return;
    }

    let text = crate::slash::normalize(raw_text);
    let session_key = skynet_core::types::ConversationKey::new("slack", &channel_id, None)
        .as_str()
        .to_string();

    let response = if text.starts_with('/') {
        skynet_agent::pipeline::slash::handle_slash_command(&text, &session_key, "slack", &ctx)
            .await
            .or(handle_local_command(&text, &ctx, &session_key).await)
    } else {
        None
    };

    match response {
        Some(r) => send::send_response(&http, &config.bot_token, &channel_id, None, &r).await,
        None => {
            use skynet_agent::pipeline::process_message_non_streaming;
            let skynet_uid = ctx
                .users()
                .resolve("slack", &user_id)
                .map(|r| r.user().id.clone())
                .unwrap_or(user_id);
            match process_message_non_streaming(
                &ctx,
                &session_key,
                "slack",
                &text,
                None,
                None,
                None,
                None,
                None,
                Some(&skynet_uid),
            )
            .await
            {
                Ok(pm) => send::send_response(&http, &config.bot_token, &channel_id, None, &pm.content).await,
                Err(e) => {
                    warn!(error = %e, session = %session_key, "Slack: slash command pipeline failed");
                }
            }
        }
    }
}

/// Handle commands that are local to the Slack adapter (not in the shared slash handler).
async fn handle_local_command<C: SlackAppContext>(
    text: &str,
    ctx: &Arc<C>,
    session_key: &str,
) -> Option<String> {
    let trimmed = text.trim();

    if trimmed.eq_ignore_ascii_case("/clear") {
        let key = skynet_agent::pipeline::resolve_conversation_key(session_key, "slack");
        let count = match ctx.sessions().get(&key) {
            Ok(Some(session)) => {
                let before = session.message_count;
                let _ = ctx.sessions().rewrite_transcript(&session.id, &[]);
                before
            }
            _ => 0,
        };
        return Some(format!(
            "Session cleared. Removed {count} messages. Starting a fresh conversation."
        ));
    }

    if trimmed.eq_ignore_ascii_case("/whoami") {
        return Some(format!(
            "Session key: `{session_key}`\n\nProvider: `{}`",
            ctx.agent().provider().name()
        ));
    }

    None
}
