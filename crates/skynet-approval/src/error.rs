use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no pending approval for conversation {key}")]
    NoPending { key: String },

    #[error("persisted allowlist I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persisted allowlist is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ApprovalError>;
