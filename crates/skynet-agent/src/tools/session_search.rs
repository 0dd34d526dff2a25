//! `session_search` tool — full-text search over the asking user's past
//! sessions, across every channel they've talked to the agent on.

use std::sync::Arc;

use async_trait::async_trait;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

/// Searches the session store's FTS index, scoped to one user.
pub struct SessionSearchTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    user_id: Option<String>,
}

impl<C: MessageContext + 'static> SessionSearchTool<C> {
    pub fn new(ctx: Arc<C>, user_id: Option<&str>) -> Self {
        Self {
            ctx,
            user_id: user_id.map(String::from),
        }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for SessionSearchTool<C> {
    fn name(&self) -> &str {
        "session_search"
    }

    fn description(&self) -> &str {
        "Full-text search over your own past sessions across every connected channel. \
         Use this to recall something discussed in a different conversation. \
         Returns up to 5 matching messages."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Full-text search query."
                },
                "role_filter": {
                    "type": "string",
                    "enum": ["user", "assistant", "tool"],
                    "description": "Restrict results to messages of this role."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results to return (default 5, capped at 5)."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim(),
            _ => return ToolResult::error("missing required parameter: query"),
        };
        let Some(user_id) = self.user_id.as_deref() else {
            return ToolResult::error("session_search is unavailable: no resolved user for this conversation");
        };
        let role_filter = input.get("role_filter").and_then(|v| v.as_str());
        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n.min(5) as usize)
            .unwrap_or(5);

        match self.ctx.sessions().search_user_sessions(user_id, query, role_filter, limit) {
            Ok(matches) if matches.is_empty() => {
                ToolResult::success(format!("No past messages found for: {}", query))
            }
            Ok(matches) => {
                let mut out = format!("Found {} matching message(s):\n\n", matches.len());
                for m in &matches {
                    out.push_str(&format!(
                        "[{} · {}] {}\n\n",
                        m.role,
                        m.created_at,
                        truncate(&m.content, 400)
                    ));
                }
                ToolResult::success(out.trim_end().to_string())
            }
            Err(e) => ToolResult::error(format!("session_search failed: {e}")),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…", &s[..max])
    }
}
