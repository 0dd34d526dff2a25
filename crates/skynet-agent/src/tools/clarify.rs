//! `clarify` — ends the current turn by asking the user a question instead
//! of guessing, rather than truly suspending the tool loop mid-call.
//!
//! The spec describes `clarify` as blocking on a callback until the user
//! replies. This codebase has no synchronous channel back to the user
//! mid-turn — every incoming message is a fresh, independently dispatched
//! pipeline run (see `pipeline::process`) — so "blocking" is implemented the
//! way a human conversation already blocks: the agent's turn ends with the
//! question as its reply, and the user's next message in the same session
//! is the answer, picked up by the next `process_message_non_streaming` call
//! with the question already in the transcript for context.

use serde_json::Value;

use super::ToolResult;

/// Handle a `clarify` call: format the question (and optional choices) as
/// the tool's output. The tool loop is responsible for treating this as a
/// turn-ending response rather than feeding it back to the LLM for another
/// iteration — see `tool_loop::run_tool_loop`.
pub fn handle(input: &Value) -> ToolResult {
    let question = match input.get("question").and_then(Value::as_str) {
        Some(q) if !q.trim().is_empty() => q.trim(),
        _ => return ToolResult::error("'question' is required"),
    };

    let choices: Vec<String> = input
        .get("choices")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    if choices.len() > 4 {
        return ToolResult::error("at most 4 choices are allowed");
    }

    let mut out = question.to_string();
    if !choices.is_empty() {
        out.push('\n');
        for (i, choice) in choices.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", i + 1, choice));
        }
    }

    ToolResult::success(out)
}

pub fn input_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "question": {
                "type": "string",
                "description": "The question to ask the user before continuing."
            },
            "choices": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Up to 4 suggested answers, shown as a numbered list."
            }
        },
        "required": ["question"]
    })
}

pub const NAME: &str = "clarify";

pub const DESCRIPTION: &str =
    "Ask the user a clarifying question instead of guessing. Ends your turn — the user's \
     next message is the answer. Offer at most 4 short choices when the question has a \
     natural small set of answers.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_without_choices() {
        let r = handle(&serde_json::json!({"question": "Which branch?"}));
        assert_eq!(r.content, "Which branch?");
    }

    #[test]
    fn question_with_choices_is_numbered() {
        let r = handle(&serde_json::json!({
            "question": "Which environment?",
            "choices": ["staging", "production"]
        }));
        assert!(r.content.contains("1. staging"));
        assert!(r.content.contains("2. production"));
    }

    #[test]
    fn more_than_four_choices_is_rejected() {
        let r = handle(&serde_json::json!({
            "question": "Pick one",
            "choices": ["a", "b", "c", "d", "e"]
        }));
        assert!(r.is_error);
    }

    #[test]
    fn missing_question_is_rejected() {
        let r = handle(&serde_json::json!({}));
        assert!(r.is_error);
    }
}
