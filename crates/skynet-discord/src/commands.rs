//! Discord native slash commands.
//!
//! Registration happens in `ready()` when `config.slash_commands` is true.
//! Interactions are dispatched from `interaction_create` in the event handler.
//! Most verbs (`/new`, `/reset`, `/undo`, `/retry`, `/personality`, `/status`,
//! `/sethome`, `/stop`, `/help`) are forwarded to the shared slash handler so
//! their behavior matches the text-command form exactly; `/ask`, `/clear`,
//! `/model`, `/memory` stay native because they need Discord-specific
//! deferral/chunking or have no text-command equivalent.

use std::sync::Arc;

use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};
use serenity::model::application::{CommandInteraction, CommandOptionType};
use serenity::model::id::GuildId;
use serenity::prelude::Context;
use tracing::{info, warn};

use crate::context::DiscordAppContext;

/// Register global slash commands. Call from `ready()`.
pub async fn register_commands(ctx: &Context, guild_id: Option<GuildId>) {
    let commands = vec![
        CreateCommand::new("ask")
            .description("Send a message to the AI assistant")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "message", "Your message")
                    .required(true),
            ),
        CreateCommand::new("clear").description("Clear your conversation history"),
        CreateCommand::new("model")
            .description("Show or switch the AI model")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "name",
                    "Model name (opus/sonnet/haiku)",
                )
                .required(false),
            ),
        CreateCommand::new("memory").description("Show your stored user memories"),
        CreateCommand::new("new").description("End this conversation and start fresh"),
        CreateCommand::new("reset").description("End this conversation and start fresh"),
        CreateCommand::new("undo").description("Pop the last exchange from the transcript"),
        CreateCommand::new("retry").description("Undo the last reply and re-ask the prior message"),
        CreateCommand::new("personality")
            .description("Switch the system-prompt personality")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "name", "Personality name")
                    .required(true),
            ),
        CreateCommand::new("status").description("Show model, token totals, and sandbox backend"),
        CreateCommand::new("sethome")
            .description("Mark this channel as the home channel for cron/reminders"),
        CreateCommand::new("stop").description("Cancel the in-flight agent turn, if any"),
    ];

    match guild_id {
        Some(gid) => match gid.set_commands(&ctx.http, commands).await {
            Ok(cmds) => info!(guild = %gid, count = cmds.len(), "registered guild slash commands"),
            Err(e) => warn!(guild = %gid, error = %e, "failed to register guild commands"),
        },
        None => {
            match serenity::model::application::Command::set_global_commands(&ctx.http, commands)
                .await
            {
                Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
                Err(e) => warn!(error = %e, "failed to register global slash commands"),
            }
        }
    }
}

/// Dispatch a slash command interaction to the appropriate handler.
pub async fn handle_interaction<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) {
    let result = match command.data.name.as_str() {
        "ask" => handle_ask(app, ctx, command).await,
        "clear" => handle_clear(app, ctx, command).await,
        "model" => handle_model(app, ctx, command).await,
        "memory" => handle_memory(app, ctx, command).await,
        "new" => forward_to_shared(app, ctx, command, "/new").await,
        "reset" => forward_to_shared(app, ctx, command, "/reset").await,
        "undo" => forward_to_shared(app, ctx, command, "/undo").await,
        "retry" => forward_to_shared(app, ctx, command, "/retry").await,
        "personality" => {
            let name = command
                .data
                .options
                .iter()
                .find(|o| o.name == "name")
                .and_then(|o| o.value.as_str())
                .unwrap_or("");
            forward_to_shared(app, ctx, command, &format!("/personality {name}")).await
        }
        "status" => forward_to_shared(app, ctx, command, "/status").await,
        "sethome" => forward_to_shared(app, ctx, command, "/sethome").await,
        "stop" => forward_to_shared(app, ctx, command, "/stop").await,
        _ => {
            respond_ephemeral(ctx, command, "Unknown command.").await;
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(command = %command.data.name, error = %e, "slash command error");
    }
}

/// Forward a native slash command to the shared text-command handler, keyed
/// by the same `(platform, chat_id)` session key the message path uses.
async fn forward_to_shared<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
    text: &str,
) -> Result<(), serenity::Error> {
    let session_key = conversation_key(command.channel_id);
    let response = skynet_agent::pipeline::slash::handle_slash_command(
        text,
        &session_key,
        "discord",
        app,
    )
    .await
    .unwrap_or_else(|| "Unknown command.".to_string());
    respond_ephemeral(ctx, command, &response).await;
    Ok(())
}

/// Resolve a Discord user to a Skynet user ID via UserResolver.
/// Falls back to the raw Discord ID on error.
fn resolve_skynet_user_id<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    discord_uid: &str,
) -> String {
    match app.users().resolve("discord", discord_uid) {
        Ok(resolved) => resolved.user().id.clone(),
        Err(e) => {
            warn!(error = %e, discord_uid, "slash command: user resolution failed");
            discord_uid.to_string()
        }
    }
}

/// `(platform, chat_id)` conversation key for a Discord channel — never
/// keyed by the invoking user, matching the text-message path in `handler.rs`.
fn conversation_key(channel_id: serenity::model::id::ChannelId) -> String {
    skynet_core::types::ConversationKey::new("discord", &channel_id.to_string(), None)
        .as_str()
        .to_string()
}

/// `/ask message:String` — send a message to the AI.
async fn handle_ask<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    use skynet_agent::pipeline::process_message_non_streaming;

    let message = command
        .data
        .options
        .iter()
        .find(|o| o.name == "message")
        .and_then(|o| o.value.as_str())
        .unwrap_or("");

    if message.is_empty() {
        respond_ephemeral(ctx, command, "Please provide a message.").await;
        return Ok(());
    }

    // Defer the response (shows "thinking...").
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let discord_uid = command.user.id.to_string();
    let skynet_user_id = resolve_skynet_user_id(app, &discord_uid);
    let session_key = conversation_key(command.channel_id);

    let response = match process_message_non_streaming(
        app,
        &session_key,
        "discord",
        message,
        None,
        None,
        Some(command.channel_id.get()),
        None,
        None,
        Some(&skynet_user_id),
    )
    .await
    {
        Ok(r) => r.content,
        Err(e) => format!("\u{26a0}\u{fe0f} Error: {}", e),
    };

    // Edit the deferred response with the actual content.
    let chunks = crate::send::split_chunks_smart(&response);
    let first_chunk = chunks
        .first()
        .map(|s| s.as_str())
        .unwrap_or("(no response)");

    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().content(first_chunk),
        )
        .await?;

    // Send remaining chunks as follow-up messages.
    for chunk in chunks.iter().skip(1) {
        let _ = command.channel_id.say(&ctx.http, chunk).await;
    }

    Ok(())
}

/// `/clear` — clear conversation history for the invoking user.
async fn handle_clear<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let session_key = conversation_key(command.channel_id);

    // Wipe the stored transcript for this session.
    let key = skynet_agent::pipeline::resolve_conversation_key(&session_key, "discord");
    let count = match app.sessions().get(&key) {
        Ok(Some(session)) => {
            let before = session.message_count;
            let _ = app.sessions().rewrite_transcript(&session.id, &[]);
            before
        }
        _ => 0,
    };

    let msg = format!("Cleared {} messages from your conversation.", count);
    respond_ephemeral(ctx, command, &msg).await;
    Ok(())
}

/// `/model [name]` — show or switch the AI model.
async fn handle_model<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let name = command
        .data
        .options
        .iter()
        .find(|o| o.name == "name")
        .and_then(|o| o.value.as_str());

    let response = match name {
        Some(model_name) => {
            let previous = app.agent().set_model(model_name.to_string()).await;
            info!(previous = %previous, new = %model_name, "model switched via /model slash command");
            format!(
                "Model switched: **{}** \u{2192} **{}**",
                previous, model_name
            )
        }
        None => {
            let model = app.agent().get_model().await;
            format!(
                "Current model: **{}**\n\nAvailable: `/model opus` | `/model sonnet` | `/model haiku`",
                model
            )
        }
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(&response),
            ),
        )
        .await?;
    Ok(())
}

/// `/memory` — show stored user memories (ephemeral).
async fn handle_memory<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    // Resolve to Skynet user so memories are looked up by the unified user ID.
    let discord_uid = command.user.id.to_string();
    let skynet_user_id = resolve_skynet_user_id(app, &discord_uid);

    let memories = app
        .memory()
        .search(&skynet_user_id, "*", 10)
        .unwrap_or_default();

    let response = if memories.is_empty() {
        "No memories stored for your account.".to_string()
    } else {
        let mut text = format!("**Your memories** ({}):\n", memories.len());
        for mem in &memories {
            text.push_str(&format!("- **{}**: {}\n", mem.key, mem.value));
        }
        text
    };

    respond_ephemeral(ctx, command, &response).await;
    Ok(())
}

/// Send an ephemeral response to a slash command (only visible to the invoker).
async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) {
    let _ = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await;
}
