/// Errors produced by the Slack adapter.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("slack api error: {0}")]
    Api(String),

    #[error("no bot token configured")]
    NoBotToken,

    #[error("no app token configured")]
    NoAppToken,
}
