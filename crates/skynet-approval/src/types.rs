use serde::{Deserialize, Serialize};

/// Outcome of scanning a command for danger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub is_dangerous: bool,
    pub pattern_key: Option<String>,
    pub description: Option<String>,
}

impl Detection {
    pub fn safe() -> Self {
        Self {
            is_dangerous: false,
            pattern_key: None,
            description: None,
        }
    }

    pub fn dangerous(pattern_key: &str, description: &str) -> Self {
        Self {
            is_dangerous: true,
            pattern_key: Some(pattern_key.to_string()),
            description: Some(description.to_string()),
        }
    }
}

/// A command awaiting an allow/deny decision for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub command: String,
    pub pattern_key: String,
    pub created_at: String,
}

/// How a pending approval was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Run the command once; forget the decision immediately after.
    AllowOnce,
    /// Run the command and remember this pattern as approved for the
    /// lifetime of the session.
    AllowAlways,
    /// Refuse to run the command.
    Deny,
}
