//! Tool registry — builds the canonical tool list for any channel adapter.

use std::sync::Arc;

use crate::pipeline::context::MessageContext;
use crate::provider::ToolDefinition;

use super::bash_session::BashSessionTool;
use super::execute_command::ExecuteCommandTool;
use super::knowledge::{KnowledgeSearchTool, KnowledgeWriteTool};
use super::link_identity::LinkIdentityTool;
use super::reminder::ReminderTool;
use super::session_search::SessionSearchTool;
use super::skill::{self, SkillsCategoriesTool, SkillsListTool, SkillViewTool};
use super::{to_definitions, Tool};

/// Tool set plus the skill index text to splice into the system prompt.
///
/// Returned together because both come out of the same skill-loading pass —
/// `build_tools` loads skills once and feeds the result to both the
/// `skills_*` tools and `format_skill_index`.
pub struct BuiltTools {
    pub tools: Vec<Box<dyn Tool>>,
    pub skill_index: String,
}

/// Build the full list of tools available to the AI for a given request.
///
/// Includes:
/// - `read_file`, `write_file`, `list_files`, `search_files`, `patch` (filesystem)
/// - `execute_command` (one-shot sh -c via TerminalManager)
/// - `bash` (persistent PTY bash session via TerminalManager)
/// - `reminder` (schedule proactive reminders via the scheduler)
/// - `knowledge_search` / `knowledge_write` (operator-curated knowledge base)
/// - `todo`, `memory_tool`, `clarify` (schema only — the tool loop intercepts
///   calls to these three before they would reach this list, per spec)
/// - `session_search` (FTS across the caller's own past sessions)
/// - `send_message` (cross-channel delivery; registered by the caller, not here)
/// - `link_identity` (self-service account linking across channels)
/// - `skills_categories`, `skills_list`, `skill_view` (progressive skill disclosure)
///
/// `channel_name` and `channel_id` are forwarded to `ReminderTool` so it can
/// embed the correct delivery target in the persisted job action.
/// `session_key` scopes `session_search`'s user lookup and is forwarded to
/// `ReminderTool` for HTTP/terminal notification routing.
pub fn build_tools<C: MessageContext + 'static>(
    ctx: Arc<C>,
    channel_name: &str,
    channel_id: Option<u64>,
    session_key: Option<&str>,
) -> BuiltTools {
    let user_id = session_key.and_then(|key| {
        let conv_key = crate::pipeline::resolve_conversation_key(key, channel_name);
        ctx.sessions().get(&conv_key).ok().flatten().and_then(|s| s.user_id)
    });

    let mut tools: Vec<Box<dyn Tool>> = vec![
        Box::new(super::read_file::ReadFileTool),
        Box::new(super::write_file::WriteFileTool),
        Box::new(super::list_files::ListFilesTool),
        Box::new(super::search_files::SearchFilesTool),
        Box::new(super::patch_file::PatchFileTool),
        Box::new(ExecuteCommandTool::new(Arc::clone(&ctx))),
        Box::new(BashSessionTool::new(Arc::clone(&ctx))),
        Box::new(ReminderTool::new(
            Arc::clone(&ctx),
            channel_name,
            channel_id,
            session_key,
        )),
        Box::new(KnowledgeSearchTool::new(Arc::clone(&ctx))),
        Box::new(KnowledgeWriteTool::new(Arc::clone(&ctx))),
        Box::new(SessionSearchTool::new(Arc::clone(&ctx), user_id.as_deref())),
        Box::new(super::send_message::SendMessageTool::new(Arc::clone(&ctx))),
        Box::new(LinkIdentityTool::new(Arc::clone(&ctx), user_id.clone())),
        Box::new(super::todo::TodoTool),
    ];

    // `memory_tool` and `clarify` carry no ctx-scoped state of their own
    // (memory_tool resolves its path from the session id at call time,
    // clarify is pure formatting) so their schema entries need no constructor
    // arguments either — listed here only so the LLM sees them advertised;
    // the tool loop intercepts both by name before dispatch ever reaches them.
    tools.push(Box::new(MemoryToolMarker));
    tools.push(Box::new(ClarifyMarker));

    let skills = skill::load_skills();
    let skill_index = skill::format_skill_index(&skills);
    tools.push(Box::new(SkillsCategoriesTool::new(skills.clone())));
    tools.push(Box::new(SkillsListTool::new(skills.clone())));
    tools.push(Box::new(SkillViewTool::new(skills)));

    // Load script plugins from ~/.skynet/tools/ — no restart needed after adding a plugin,
    // tools are re-scanned on each build_tools() call (i.e. each new message).
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let tools_dir = std::path::Path::new(&home).join(".skynet/tools");
    tools.extend(super::script_tool::load_script_tools(&tools_dir));

    BuiltTools { tools, skill_index }
}

/// Schema-only stand-in for `memory_tool` — see [`build_tools`].
struct MemoryToolMarker;

#[async_trait::async_trait]
impl Tool for MemoryToolMarker {
    fn name(&self) -> &str {
        super::memory_tool::NAME
    }
    fn description(&self) -> &str {
        super::memory_tool::DESCRIPTION
    }
    fn input_schema(&self) -> serde_json::Value {
        super::memory_tool::input_schema()
    }
    async fn execute(&self, _input: serde_json::Value) -> super::ToolResult {
        super::ToolResult::error(
            "memory_tool is intercepted before registry dispatch and should never be executed directly",
        )
    }
}

/// Schema-only stand-in for `clarify` — see [`build_tools`].
struct ClarifyMarker;

#[async_trait::async_trait]
impl Tool for ClarifyMarker {
    fn name(&self) -> &str {
        super::clarify::NAME
    }
    fn description(&self) -> &str {
        super::clarify::DESCRIPTION
    }
    fn input_schema(&self) -> serde_json::Value {
        super::clarify::input_schema()
    }
    async fn execute(&self, _input: serde_json::Value) -> super::ToolResult {
        super::ToolResult::error(
            "clarify is intercepted before registry dispatch and should never be executed directly",
        )
    }
}

/// Convert a tool list to API-level definitions for the LLM request.
pub fn tool_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    to_definitions(tools)
}
