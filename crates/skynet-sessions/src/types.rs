use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skynet_core::types::ConversationKey;

use crate::error::{Result, SessionError};

/// Where a message or session originated.
///
/// The tuple `(platform, chat_id, thread_id)` is the conversation key;
/// everything else here is denormalized context attached once at session
/// creation and treated as immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub platform: String,
    pub chat_id: String,
    pub chat_name: Option<String>,
    pub chat_type: ChatType,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub thread_id: Option<String>,
    pub chat_topic: Option<String>,
}

impl Origin {
    /// Synthetic origin used by the local CLI adapter.
    pub fn cli() -> Self {
        Self {
            platform: "local".to_string(),
            chat_id: "cli".to_string(),
            chat_name: None,
            chat_type: ChatType::Dm,
            user_id: None,
            user_name: None,
            thread_id: None,
            chat_topic: None,
        }
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.platform, &self.chat_id, self.thread_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Dm,
    Group,
    Channel,
    Thread,
    Forum,
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChatType::Dm => "dm",
            ChatType::Group => "group",
            ChatType::Channel => "channel",
            ChatType::Thread => "thread",
            ChatType::Forum => "forum",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChatType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dm" => Ok(ChatType::Dm),
            "group" => Ok(ChatType::Group),
            "channel" => Ok(ChatType::Channel),
            "thread" => Ok(ChatType::Thread),
            "forum" => Ok(ChatType::Forum),
            other => Err(format!("unknown chat type: {other}")),
        }
    }
}

/// A persisted conversation session.
///
/// Lazily created on first user turn per conversation key. A session is
/// either active (`ended_at` unset) or ended; once ended its counters are
/// frozen. `parent_session_id` links a compression-split session back to the
/// one it was split from, forming a forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// UUIDv7 primary key — time-sortable.
    pub id: String,
    pub key: ConversationKey,
    pub source: String,
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub model_config: Option<String>,
    pub system_prompt: Option<String>,
    pub parent_session_id: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub end_reason: Option<String>,
    pub message_count: u32,
    pub tool_call_count: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub updated_at: String,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single requested tool invocation attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// One encrypted reasoning item from a responses-API turn, replayed verbatim
/// ahead of the `function_call` items on the following turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub encrypted_content: String,
}

/// Ordered by `(timestamp, insertion_order)` within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_name: Option<String>,
    pub token_count: Option<u32>,
    pub finish_reason: Option<String>,
    pub reasoning_details: Option<String>,
    pub codex_reasoning_items: Option<Vec<ReasoningItem>>,
    /// Set for a copy appended by the mirror mechanism rather than the
    /// conversation it's attached to — never replayed back into the pipeline.
    pub mirror: bool,
    pub created_at: String,
}

/// A fully rendered session ready to hand to the compressor / provider.
pub struct Transcript {
    pub session: Session,
    pub messages: Vec<Message>,
}

/// Parse a stored conversation-key string back into [`ConversationKey`],
/// returning [`SessionError::InvalidKey`] on malformed input.
pub fn parse_key(s: &str) -> Result<ConversationKey> {
    let key = ConversationKey(s.to_string());
    if key.parse().is_none() {
        return Err(SessionError::InvalidKey(s.to_string()));
    }
    Ok(key)
}

pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_roundtrips() {
        let key = ConversationKey::new("telegram", "12345", None);
        assert_eq!(key.as_str(), "conv:telegram:12345");
        let (p, c, t) = key.parse().unwrap();
        assert_eq!(p, "telegram");
        assert_eq!(c, "12345");
        assert_eq!(t, None);
    }

    #[test]
    fn conversation_key_with_thread_roundtrips() {
        let key = ConversationKey::new("discord", "999", Some("thread-7"));
        let (p, c, t) = key.parse().unwrap();
        assert_eq!(p, "discord");
        assert_eq!(c, "999");
        assert_eq!(t.as_deref(), Some("thread-7"));
    }

    #[test]
    fn same_user_different_platform_is_different_key() {
        let a = ConversationKey::new("telegram", "u2", None);
        let b = ConversationKey::new("discord", "u2", None);
        assert_ne!(a, b);
    }

    #[test]
    fn parse_key_rejects_bad_prefix() {
        assert!(parse_key("user:u-1:agent:main:main").is_err());
    }
}
