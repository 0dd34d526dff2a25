use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The requested session does not exist in the database.
    #[error("session not found: {key}")]
    NotFound { key: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided session key string is malformed.
    ///
    /// Expected format: `conv:{platform}:{chat_id}[:{thread_id}]`
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    /// The user has reached the maximum allowed number of sessions.
    #[error("session limit exceeded for user {user_id}: max {limit}")]
    LimitExceeded { user_id: String, limit: usize },

    /// A tool-role message referenced a `tool_call_id` with no matching
    /// earlier assistant `tool_calls[].id` in the same session.
    #[error("dangling tool_call_id {tool_call_id} in session {session_id}")]
    DanglingToolCall {
        session_id: String,
        tool_call_id: String,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;
