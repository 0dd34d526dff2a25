//! Shared slash command handler — intercepted before the AI pipeline.
//!
//! Handles `/help`, `/version`, `/model`, `/tools`, `/reload`, `/config`,
//! `/reset`, `/new`, `/undo`, `/retry`, `/personality`, `/status`, `/sethome`
//! across all channels (gateway WS/HTTP, Discord, Telegram, …).
//! Channel-specific commands (e.g. `/clear`, `/whoami` on Telegram) are
//! handled locally in each channel adapter.

use std::sync::Arc;

use tracing::info;

use skynet_sessions::types::Role as SessionRole;

use super::process::{process_message_non_streaming, resolve_conversation_key};
use crate::pipeline::MessageContext;

/// Known model aliases for user-friendly switching.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("opus", "claude-opus-4-6"),
    ("sonnet", "claude-sonnet-4-6"),
    ("haiku", "claude-haiku-4-5"),
];

/// Resolve a model alias ("opus", "haiku") or full model ID to a canonical model string.
fn resolve_model_alias(input: &str) -> Option<&'static str> {
    let lower = input.to_lowercase();
    for &(alias, full) in MODEL_ALIASES {
        if lower == alias || lower == full {
            return Some(full);
        }
    }
    None
}

/// Handle shared slash commands before sending to the AI.
///
/// Returns `Some(response)` if the message was a recognized command,
/// `None` if it should be forwarded to the AI pipeline.
///
/// `session_key`/`channel_name` identify the conversation the command was
/// issued in — every command that touches session state acts on the
/// conversation-scoped session that key owns, never on a per-user one.
///
/// Recognized commands:
///   `/help`              — list all available commands
///   `/version`           — show version and protocol info
///   `/model`             — show current model
///   `/model <name>`      — switch to a different model
///   `/tools`             — list all available tools
///   `/reload`            — reload workspace prompt from disk
///   `/config`            — show runtime configuration summary
///   `/reset` / `/new`    — end current session, start fresh
///   `/undo`              — pop the last user/assistant exchange
///   `/retry`             — undo the last reply and re-issue the prior message
///   `/personality <name>`— switch the system-prompt personality
///   `/status`            — model, message/token counts, sandbox backend
///   `/sethome`           — mark this chat as the home channel for the platform
pub async fn handle_slash_command<C: MessageContext + 'static>(
    message: &str,
    session_key: &str,
    channel_name: &str,
    ctx: &Arc<C>,
) -> Option<String> {
    let trimmed = message.trim();

    if let Some(name) = recognized_command_name(trimmed) {
        emit_command_hook(ctx, name, session_key, channel_name);
    }

    // /help
    if trimmed.eq_ignore_ascii_case("/help") {
        return Some(
            "**Skynet Commands**\n\
             - `/help` — show this help\n\
             - `/version` — show version info\n\
             - `/model` — show current model\n\
             - `/model <name>` — switch model (`opus`, `sonnet`, `haiku`)\n\
             - `/tools` — list available AI tools\n\
             - `/reload` — reload workspace prompt from disk\n\
             - `/config` — show runtime configuration\n\
             - `/reset`, `/new` — end this conversation and start fresh\n\
             - `/undo` — pop the last exchange from the transcript\n\
             - `/retry` — undo the last reply and re-ask the prior message\n\
             - `/personality <name>` — switch the system-prompt personality\n\
             - `/status` — model, token totals, active toolsets, sandbox\n\
             - `/sethome` — mark this chat as the home channel\n\
             - `/stop` — emergency stop (gateway only)"
                .to_string(),
        );
    }

    // /version
    if trimmed.eq_ignore_ascii_case("/version") {
        return Some(format!(
            "**Skynet v{}**\n- Protocol: v{}\n- Provider: `{}`",
            env!("CARGO_PKG_VERSION"),
            skynet_core::config::PROTOCOL_VERSION,
            ctx.agent().provider().name(),
        ));
    }

    // /model [name]
    if trimmed.eq_ignore_ascii_case("/model") {
        let model = ctx.agent().get_model().await;
        return Some(format!(
            "Current model: **{}**\n\nAvailable: `/model opus` | `/model sonnet` | `/model haiku`",
            model
        ));
    }

    if let Some(arg) = trimmed
        .strip_prefix("/model ")
        .or_else(|| trimmed.strip_prefix("/model\t"))
    {
        let arg = arg.trim();
        if let Some(resolved) = resolve_model_alias(arg) {
            let previous = ctx.agent().set_model(resolved.to_string()).await;
            info!(previous = %previous, new = %resolved, "model switched via /model command");
            return Some(format!(
                "Model switched: **{}** -> **{}**",
                previous, resolved
            ));
        }
        return Some(format!(
            "Unknown model: `{}`. Available: `opus`, `sonnet`, `haiku`",
            arg
        ));
    }

    // /personality [name]
    if trimmed.eq_ignore_ascii_case("/personality") {
        let current = ctx.agent().personality_name().await;
        return Some(match current {
            Some(name) => format!("Current personality: **{name}**"),
            None => "Current personality: **default** (workspace SOUL.md)".to_string(),
        });
    }
    if let Some(arg) = trimmed
        .strip_prefix("/personality ")
        .or_else(|| trimmed.strip_prefix("/personality\t"))
    {
        let name = arg.trim();
        if name.is_empty() {
            return Some("Usage: `/personality <name>`".to_string());
        }
        return Some(match ctx.agent().switch_personality(name).await {
            Ok(()) => format!("Personality switched to **{name}**."),
            Err(e) => format!("Could not switch personality: {e}"),
        });
    }

    // /tools
    if trimmed.eq_ignore_ascii_case("/tools") {
        return Some(build_tools_listing());
    }

    // /reload
    if trimmed.eq_ignore_ascii_case("/reload") {
        ctx.agent().reload_prompt().await;
        if let Some(hooks) = ctx.hooks() {
            if let Err(e) = hooks.discover_and_load() {
                return Some(format!(
                    "Workspace prompt reloaded, but hook reload failed: {e}"
                ));
            }
        }
        return Some(
            "Workspace prompt reloaded from disk. All `.md` files in `~/.skynet/` re-read, \
             hooks rescanned."
                .to_string(),
        );
    }

    // /config
    if trimmed.eq_ignore_ascii_case("/config") {
        let model = ctx.agent().get_model().await;
        let provider = ctx.agent().provider().name();
        let port = ctx
            .gateway_port()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let db = ctx.database_path().unwrap_or("N/A");
        return Some(format!(
            "**Skynet Runtime**\n- Model: `{}`\n- Provider: `{}`\n- Port: `{}`\n- Database: `{}`",
            model, provider, port, db
        ));
    }

    // /reset, /new — end the current session, let the next turn create a fresh one.
    if trimmed.eq_ignore_ascii_case("/reset") || trimmed.eq_ignore_ascii_case("/new") {
        let key = resolve_conversation_key(session_key, channel_name);
        let reply = match ctx.sessions().get(&key) {
            Ok(Some(session)) => match ctx.sessions().end_session(&session.id, "reset") {
                Ok(()) => "Session reset. Starting fresh on your next message.".to_string(),
                Err(e) => format!("Could not reset session: {e}"),
            },
            Ok(None) => "No active session to reset — already starting fresh.".to_string(),
            Err(e) => format!("Could not reset session: {e}"),
        };
        if let Some(hooks) = ctx.hooks() {
            let hooks = Arc::clone(hooks);
            let payload = serde_json::json!({ "channel": channel_name, "session_key": session_key });
            tokio::spawn(async move { hooks.emit("session:reset", payload).await });
        }
        return Some(reply);
    }

    // /undo — pop the last complete exchange from the transcript.
    if trimmed.eq_ignore_ascii_case("/undo") {
        let key = resolve_conversation_key(session_key, channel_name);
        return Some(match pop_last_exchange(ctx.as_ref(), &key).await {
            Some(_) => "Undid the last exchange.".to_string(),
            None => "Nothing to undo.".to_string(),
        });
    }

    // /retry — undo the last reply, then re-issue the prior user message.
    if trimmed.eq_ignore_ascii_case("/retry") {
        let key = resolve_conversation_key(session_key, channel_name);
        let prior_text = match pop_last_exchange(ctx.as_ref(), &key).await {
            Some(text) => text,
            None => return Some("Nothing to retry.".to_string()),
        };
        return Some(
            match process_message_non_streaming(
                ctx,
                session_key,
                channel_name,
                &prior_text,
                None,
                None,
                None,
                None,
                None,
                None,
            )
            .await
            {
                Ok(pm) => pm.content,
                Err(e) => format!("Retry failed: {e}"),
            },
        );
    }

    // /status
    if trimmed.eq_ignore_ascii_case("/status") {
        let key = resolve_conversation_key(session_key, channel_name);
        let model = ctx.agent().get_model().await;
        let provider = ctx.agent().provider().name();
        let sandbox = ctx.sandbox().name();
        let (messages, tool_calls, tokens_in, tokens_out) = match ctx.sessions().get(&key) {
            Ok(Some(session)) => (
                session.message_count,
                session.tool_call_count,
                session.input_tokens,
                session.output_tokens,
            ),
            _ => (0, 0, 0, 0),
        };
        return Some(format!(
            "**Status**\n\
             - Model: `{model}` (provider `{provider}`)\n\
             - Sandbox: `{sandbox}`\n\
             - Messages: {messages} | Tool calls: {tool_calls}\n\
             - Tokens: {tokens_in} in / {tokens_out} out"
        ));
    }

    // /sethome
    if trimmed.eq_ignore_ascii_case("/sethome") {
        let key = resolve_conversation_key(session_key, channel_name);
        let Some((platform, chat_id, _)) = key.parse() else {
            return Some("Could not determine this chat's platform/ID.".to_string());
        };
        return Some(match skynet_core::home::set_home(&platform, &chat_id) {
            Ok(()) => format!("This chat is now the home channel for `{platform}`."),
            Err(e) => format!("Could not set home channel: {e}"),
        });
    }

    // Not a recognized shared command.
    None
}

/// All shared slash verbs, for `command:<name>` hook dispatch. Keep in sync
/// with the branches in [`handle_slash_command`].
const KNOWN_COMMANDS: &[&str] = &[
    "help",
    "version",
    "model",
    "tools",
    "reload",
    "config",
    "reset",
    "new",
    "undo",
    "retry",
    "personality",
    "status",
    "sethome",
];

/// Extract the bare command name (`/model opus` -> `"model"`) if `trimmed`
/// starts with a recognized shared verb, else `None`.
fn recognized_command_name(trimmed: &str) -> Option<&'static str> {
    let word = trimmed.strip_prefix('/')?.split_whitespace().next()?;
    KNOWN_COMMANDS
        .iter()
        .find(|&&name| name.eq_ignore_ascii_case(word))
        .copied()
}

/// Fire `command:<name>` (and the `command:*` wildcard) fire-and-forget.
fn emit_command_hook<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    name: &str,
    session_key: &str,
    channel_name: &str,
) {
    let Some(hooks) = ctx.hooks() else {
        return;
    };
    let hooks = Arc::clone(hooks);
    let event = format!("command:{name}");
    let payload = serde_json::json!({ "channel": channel_name, "session_key": session_key });
    tokio::spawn(async move { hooks.emit(&event, payload).await });
}

/// Pop the last complete user/assistant exchange off a session's transcript
/// via `rewrite_transcript`, returning the prior user message's text.
///
/// Returns `None` if there's no active session, or no user turn to undo.
async fn pop_last_exchange<C: MessageContext>(
    ctx: &C,
    key: &skynet_core::types::ConversationKey,
) -> Option<String> {
    let session = ctx.sessions().get(key).ok()??;
    let transcript = ctx.sessions().load_transcript(&session.id).ok()?;
    let mut messages = transcript.messages;
    let last_user_idx = messages.iter().rposition(|m| m.role == SessionRole::User)?;
    let prior_text = messages[last_user_idx].content.clone();
    messages.truncate(last_user_idx);
    ctx.sessions().rewrite_transcript(&session.id, &messages).ok()?;
    Some(prior_text)
}

/// Build the `/tools` listing: built-in tools + script plugins + skills.
fn build_tools_listing() -> String {
    let mut out = String::from("**Skynet Tools**\n\n");

    // Built-in tools
    out.push_str("**Built-in:**\n");
    for (name, desc) in crate::tools::tool_catalog() {
        out.push_str(&format!("- `{}` — {}\n", name, desc));
    }

    // Script plugins from ~/.skynet/tools/
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let tools_dir = std::path::Path::new(&home).join(".skynet/tools");
    if tools_dir.is_dir() {
        let scripts: Vec<String> = std::fs::read_dir(&tools_dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext == "sh" || ext == "py" || ext == "js")
            })
            .map(|e| {
                e.path()
                    .file_stem()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        if !scripts.is_empty() {
            out.push_str(&format!("\n**Script plugins** ({}):\n", scripts.len()));
            for name in &scripts {
                out.push_str(&format!("- `{}`\n", name));
            }
        }
    }

    // Skills from ~/.skynet/skills/
    let skills = crate::tools::skill::load_skills();
    if !skills.is_empty() {
        out.push_str(&format!("\n**Skills** ({}):\n", skills.len()));
        for skill in &skills {
            let tags = if skill.meta.tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", skill.meta.tags.join(", "))
            };
            out.push_str(&format!(
                "- `{}` — {}{}\n",
                skill.meta.name, skill.meta.description, tags
            ));
        }
    }

    out
}
