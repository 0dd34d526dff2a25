//! Attachment handling — downloads Slack file shares (bot-token-authenticated,
//! since private file URLs reject anonymous requests) and converts them into
//! Anthropic-style content blocks for the LLM pipeline.

use base64::Engine;
use serde_json::Value;
use tracing::warn;

/// Convert Slack's `event.files` array into Anthropic content blocks.
///
/// Images are downloaded and base64-inlined; everything else becomes a
/// placeholder text block, matching the original adapter's file handling
/// (it only special-cased images and audio).
pub async fn to_content_blocks(
    client: &reqwest::Client,
    bot_token: &str,
    files: &[Value],
    max_bytes: u64,
) -> Vec<Value> {
    let mut blocks = Vec::new();

    for file in files {
        let mimetype = file["mimetype"].as_str().unwrap_or("unknown");
        let filename = file["name"].as_str().unwrap_or("file");
        let size = file["size"].as_u64().unwrap_or(0);
        let url = file["url_private_download"]
            .as_str()
            .or_else(|| file["url_private"].as_str());

        let Some(url) = url else {
            blocks.push(serde_json::json!({
                "type": "text",
                "text": format!("[Attachment '{filename}' has no downloadable URL]")
            }));
            continue;
        };

        if size > max_bytes {
            blocks.push(serde_json::json!({
                "type": "text",
                "text": format!("[Attachment '{filename}' skipped: {size} bytes exceeds limit]")
            }));
            continue;
        }

        if mimetype.starts_with("image/") {
            match download_bytes(client, bot_token, url).await {
                Ok(bytes) => {
                    let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    blocks.push(serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": mimetype,
                            "data": b64
                        }
                    }));
                }
                Err(e) => {
                    warn!(filename = %filename, error = %e, "slack: failed to download image");
                    blocks.push(serde_json::json!({
                        "type": "text",
                        "text": format!("[Image '{filename}' download failed: {e}]")
                    }));
                }
            }
        } else if mimetype.starts_with("audio/") {
            blocks.push(serde_json::json!({
                "type": "text",
                "text": format!("[Audio attachment: '{filename}' ({size} bytes)]")
            }));
        } else {
            blocks.push(serde_json::json!({
                "type": "text",
                "text": format!("[Attachment: '{filename}' ({mimetype}, {size} bytes)]")
            }));
        }
    }

    blocks
}

async fn download_bytes(client: &reqwest::Client, bot_token: &str, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let resp = client.get(url).bearer_auth(bot_token).send().await?;
    resp.bytes().await.map(|b| b.to_vec())
}
