//! Slack channel adapter.
//!
//! Wraps a Socket Mode connection and drives the envelope read loop until the
//! process exits, reconnecting automatically on transport errors or an
//! explicit `"disconnect"` envelope.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use skynet_core::config::SlackConfig;
use skynet_core::types::ChannelOutbound;

use crate::context::SlackAppContext;
use crate::handler::{handle_message_event, handle_slash_command_event};
use crate::socket;

/// Slack channel adapter.
///
/// Unlike Telegram's long-polling or Discord's gateway, Slack's Socket Mode
/// connection must be re-opened (a fresh wss URL requested) on every
/// reconnect — the URL is single-use.
pub struct SlackAdapter<C: SlackAppContext + 'static> {
    ctx: Arc<C>,
    config: SlackConfig,
}

impl<C: SlackAppContext + 'static> SlackAdapter<C> {
    pub fn new(config: &SlackConfig, ctx: Arc<C>) -> Self {
        Self {
            ctx,
            config: config.clone(),
        }
    }

    /// Connect to Slack and drive the Socket Mode read loop.
    ///
    /// Never returns — runs for the lifetime of the process, reconnecting on
    /// transport failure with a fixed backoff.
    ///
    /// Reminder delivery is not wired in: `ReminderDelivery::channel_id` is
    /// numeric-only and Slack channel IDs are alphanumeric (`"C0123ABC"`).
    /// If `outbound_rx` is `Some`, a cross-channel outbound delivery task is
    /// spawned — `ChannelOutbound::recipient` is a plain string and has no
    /// such restriction.
    pub async fn run(self, outbound_rx: Option<tokio::sync::mpsc::Receiver<ChannelOutbound>>) {
        let http = reqwest::Client::new();

        if let Some(rx) = outbound_rx {
            let http2 = http.clone();
            let bot_token = self.config.bot_token.clone();
            tokio::spawn(run_outbound_delivery(http2, bot_token, rx));
        }

        let bot_user_id = match socket::auth_test(&self.config.bot_token).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "slack: auth.test failed, mention detection disabled");
                None
            }
        };

        loop {
            info!("slack: opening Socket Mode connection");
            match socket::connect(&self.config.app_token).await {
                Ok(mut ws) => {
                    if let Err(e) = self.drive(&mut ws, bot_user_id.clone(), &http).await {
                        warn!(error = %e, "slack: socket loop ended, reconnecting");
                    }
                }
                Err(e) => {
                    error!(error = %e, "slack: failed to open Socket Mode connection");
                }
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
    }

    async fn drive(
        &self,
        ws: &mut socket::SlackSocket,
        bot_user_id: Option<String>,
        http: &reqwest::Client,
    ) -> Result<(), crate::error::SlackError> {
        loop {
            let envelope = socket::next_envelope(ws).await?;
            let Some(envelope) = envelope else { continue };

            if let Some(envelope_id) = &envelope.envelope_id {
                socket::ack(ws, envelope_id).await;
            }

            match envelope.envelope_type.as_str() {
                "hello" => info!("slack: hello received"),
                "disconnect" => {
                    info!("slack: server requested reconnect");
                    return Ok(());
                }
                "events_api" => {
                    let Some(payload) = envelope.payload else { continue };
                    let event = &payload["event"];
                    if event["type"].as_str() == Some("message") {
                        tokio::spawn(handle_message_event(
                            event.clone(),
                            Arc::clone(&self.ctx),
                            self.config.clone(),
                            http.clone(),
                            bot_user_id.clone(),
                        ));
                    }
                }
                "slash_commands" => {
                    let Some(payload) = envelope.payload else { continue };
                    tokio::spawn(handle_slash_command_event(
                        payload,
                        Arc::clone(&self.ctx),
                        self.config.clone(),
                        http.clone(),
                    ));
                }
                other => {
                    tracing::debug!(envelope_type = %other, "slack: ignoring envelope type");
                }
            }
        }
    }
}

/// Background task that delivers cross-channel outbound messages to Slack channels.
async fn run_outbound_delivery(
    http: reqwest::Client,
    bot_token: String,
    mut rx: tokio::sync::mpsc::Receiver<ChannelOutbound>,
) {
    info!("slack outbound delivery task started");
    while let Some(outbound) = rx.recv().await {
        crate::send::send_response(&http, &bot_token, &outbound.recipient, None, &outbound.message).await;
    }
    warn!("slack outbound delivery task ended (channel closed)");
}
