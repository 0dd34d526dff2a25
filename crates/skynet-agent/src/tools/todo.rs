//! `todo` tool — an in-memory per-session plan, intercepted by the tool loop
//! before ordinary registry dispatch (it needs direct access to the
//! in-process todo store, not just its own input JSON).
//!
//! The store is process-wide and keyed by session ID, same lifetime as the
//! `bash` PTY sessions in `bash_session.rs`: alive for as long as the
//! gateway process runs, gone on restart. That matches the spec's
//! description of `todo` as an "in-memory plan", not a durable record.

use std::sync::OnceLock;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Tool, ToolResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

fn store() -> &'static DashMap<String, Vec<TodoItem>> {
    static STORE: OnceLock<DashMap<String, Vec<TodoItem>>> = OnceLock::new();
    STORE.get_or_init(DashMap::new)
}

/// Current plan for `session_id`, or an empty list if none has been set yet.
pub fn current(session_id: &str) -> Vec<TodoItem> {
    store()
        .get(session_id)
        .map(|v| v.clone())
        .unwrap_or_default()
}

/// Render the plan the way the system prompt / compression summary embed it.
pub fn render(session_id: &str) -> String {
    render_items(&current(session_id))
}

pub fn render_items(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Current plan\n");
    for item in items {
        let mark = match item.status {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Completed => "[x]",
        };
        out.push_str(&format!("- {mark} {} ({})\n", item.content, item.id));
    }
    out
}

/// Handle a `todo` tool call: read the current plan when `todos` is absent,
/// otherwise replace it (or merge into it when `merge: true`).
///
/// This is what the tool loop calls directly for the `todo` name, ahead of
/// normal registry dispatch — see `tool_loop::run_tool_loop`.
pub fn handle(session_id: &str, input: &Value) -> ToolResult {
    let Some(todos) = input.get("todos") else {
        let items = current(session_id);
        return if items.is_empty() {
            ToolResult::success("No plan set yet.")
        } else {
            ToolResult::success(render_items(&items))
        };
    };

    let incoming: Vec<TodoItem> = match serde_json::from_value(todos.clone()) {
        Ok(v) => v,
        Err(e) => return ToolResult::error(format!("invalid todos: {e}")),
    };

    let merge = input.get("merge").and_then(Value::as_bool).unwrap_or(false);

    let mut entry = store().entry(session_id.to_string()).or_default();
    if merge {
        for item in incoming {
            match entry.iter_mut().find(|existing| existing.id == item.id) {
                Some(existing) => *existing = item,
                None => entry.push(item),
            }
        }
    } else {
        *entry = incoming;
    }

    ToolResult::success(render_items(&entry))
}

/// JSON schema advertised to the LLM for the `todo` tool.
pub fn input_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "todos": {
                "type": "array",
                "description": "Full or partial plan. Omit to read the current plan instead of writing it.",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "content": {"type": "string"},
                        "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]}
                    },
                    "required": ["id", "content", "status"]
                }
            },
            "merge": {
                "type": "boolean",
                "description": "When true, upsert `todos` into the existing plan by id instead of replacing it wholesale."
            }
        }
    })
}

pub const NAME: &str = "todo";

pub const DESCRIPTION: &str =
    "Read or write your in-memory plan for this session. Call with no `todos` to read \
     the current plan. Call with `todos` to replace it, or `todos` + `merge: true` to \
     upsert specific items by id.";

/// Marker [`Tool`] used only for schema export — the tool loop intercepts
/// calls to `todo` directly and never calls [`Tool::execute`] on this.
pub struct TodoTool;

#[async_trait::async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        input_schema()
    }

    async fn execute(&self, _input: Value) -> ToolResult {
        ToolResult::error("todo is intercepted before registry dispatch and should never be executed directly")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_empty_plan_says_so() {
        let r = handle("s1", &serde_json::json!({}));
        assert!(!r.is_error);
        assert_eq!(r.content, "No plan set yet.");
    }

    #[test]
    fn write_then_read_roundtrips() {
        let input = serde_json::json!({
            "todos": [{"id": "1", "content": "finish feature X", "status": "in_progress"}]
        });
        let w = handle("s2", &input);
        assert!(w.content.contains("finish feature X"));

        let r = handle("s2", &serde_json::json!({}));
        assert!(r.content.contains("finish feature X"));
        assert!(r.content.contains("[~]"));
    }

    #[test]
    fn merge_upserts_by_id() {
        handle(
            "s3",
            &serde_json::json!({"todos": [
                {"id": "1", "content": "a", "status": "pending"},
                {"id": "2", "content": "b", "status": "pending"}
            ]}),
        );
        let r = handle(
            "s3",
            &serde_json::json!({"merge": true, "todos": [
                {"id": "1", "content": "a", "status": "completed"}
            ]}),
        );
        assert!(r.content.contains("[x] a"));
        assert!(r.content.contains("[ ] b"));
    }

    #[test]
    fn sessions_are_isolated() {
        handle(
            "s4",
            &serde_json::json!({"todos": [{"id": "1", "content": "only in s4", "status": "pending"}]}),
        );
        let other = current("s5-unrelated");
        assert!(other.is_empty());
    }
}
