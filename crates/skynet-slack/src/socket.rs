//! Socket Mode transport — opens the websocket URL via `apps.connections.open`
//! and wraps the resulting `tokio-tungstenite` stream.
//!
//! Socket Mode envelopes: `{"type": "hello"|"events_api"|"slash_commands"|
//! "interactive"|"disconnect", "envelope_id": "...", "payload": {...}}`.
//! Every `events_api`/`slash_commands`/`interactive` envelope must be acked
//! by echoing `{"envelope_id": "..."}` back over the same socket within 3s,
//! or Slack redelivers it.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::SlackError;

const CONNECTIONS_OPEN_URL: &str = "https://slack.com/api/apps.connections.open";
const AUTH_TEST_URL: &str = "https://slack.com/api/auth.test";

pub type SlackSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A single Socket Mode envelope as received over the websocket.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub envelope_id: Option<String>,
    pub payload: Option<serde_json::Value>,
}

/// Request a fresh Socket Mode websocket URL using the app-level token.
pub async fn open_connection_url(app_token: &str) -> Result<String, SlackError> {
    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(CONNECTIONS_OPEN_URL)
        .bearer_auth(app_token)
        .send()
        .await?
        .json()
        .await?;

    if resp["ok"].as_bool() != Some(true) {
        return Err(SlackError::Api(
            resp["error"].as_str().unwrap_or("connections.open failed").to_string(),
        ));
    }
    resp["url"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SlackError::Api("connections.open: missing url".to_string()))
}

/// Identify the bot's own user ID, for `@mention` detection in channel messages.
pub async fn auth_test(bot_token: &str) -> Result<String, SlackError> {
    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(AUTH_TEST_URL)
        .bearer_auth(bot_token)
        .send()
        .await?
        .json()
        .await?;

    if resp["ok"].as_bool() != Some(true) {
        return Err(SlackError::Api(
            resp["error"].as_str().unwrap_or("auth.test failed").to_string(),
        ));
    }
    resp["user_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SlackError::Api("auth.test: missing user_id".to_string()))
}

/// Open a new Socket Mode connection: resolve the wss URL, then connect.
pub async fn connect(app_token: &str) -> Result<SlackSocket, SlackError> {
    let url = open_connection_url(app_token).await?;
    let (stream, _resp) = tokio_tungstenite::connect_async(url).await?;
    Ok(stream)
}

/// Ack a received envelope by echoing its `envelope_id` back over the socket.
pub async fn ack(socket: &mut SlackSocket, envelope_id: &str) {
    let frame = serde_json::json!({ "envelope_id": envelope_id });
    if let Err(e) = socket.send(WsMessage::Text(frame.to_string().into())).await {
        warn!(error = %e, "slack: failed to ack envelope");
    }
}

/// Read the next envelope off the socket, if any.
///
/// Returns `Ok(None)` for non-text frames (ping/pong/binary), `Err` when the
/// socket is closed or a frame fails to parse as an envelope.
pub async fn next_envelope(socket: &mut SlackSocket) -> Result<Option<Envelope>, SlackError> {
    match socket.next().await {
        Some(Ok(WsMessage::Text(text))) => {
            let envelope: Envelope = serde_json::from_str(&text)?;
            debug!(envelope_type = %envelope.envelope_type, "slack: received envelope");
            Ok(Some(envelope))
        }
        Some(Ok(WsMessage::Close(_))) | None => {
            Err(SlackError::Api("socket closed".to_string()))
        }
        Some(Ok(_)) => Ok(None),
        Some(Err(e)) => Err(SlackError::WebSocket(e)),
    }
}
