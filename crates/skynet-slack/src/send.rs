//! Message sending helpers for the Slack adapter.
//!
//! Slack's hard limit is much higher than 4000 characters, but `mrkdwn`
//! rendering can inflate short text considerably, so outbound messages are
//! chunked at 4000 the same as the original Python adapter.

use tracing::warn;

/// Maximum characters per Slack message chunk.
const CHUNK_MAX: usize = 4000;

/// Split `text` into chunks of at most [`CHUNK_MAX`] characters, preferring
/// splits on whitespace/newline boundaries to avoid cutting words mid-way.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > CHUNK_MAX {
        let window = &remaining[..CHUNK_MAX];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .unwrap_or(CHUNK_MAX);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }

    chunks
}

/// Send `text` to `channel_id` (optionally as a threaded reply) in chunks.
pub async fn send_response(
    client: &reqwest::Client,
    bot_token: &str,
    channel_id: &str,
    thread_ts: Option<&str>,
    text: &str,
) {
    for chunk in split_chunks(text) {
        let mut body = serde_json::json!({
            "channel": channel_id,
            "text": chunk,
        });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::Value::String(ts.to_string());
        }

        let result = client
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(bot_token)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(json) if json["ok"].as_bool() != Some(true) => {
                    warn!(error = %json["error"], channel = %channel_id, "slack: chat.postMessage rejected");
                }
                Err(e) => warn!(error = %e, "slack: failed to parse chat.postMessage response"),
                _ => {}
            },
            Err(e) => warn!(error = %e, channel = %channel_id, "slack: chat.postMessage request failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Hello, world!");
    }

    #[test]
    fn long_text_splits_on_newline() {
        let line = "a".repeat(3000);
        let text = format!("{line}\n{line}");
        let chunks = split_chunks(&text);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX, "chunk too large: {}", c.len());
        }
    }

    #[test]
    fn very_long_word_still_splits() {
        let text = "x".repeat(9000);
        let chunks = split_chunks(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }
}
