//! skynet-memory — durable per-user facts, preferences, and knowledge base.
//!
//! Conversation transcripts live in `skynet-sessions`; this crate only owns
//! the `user_memory` table (facts/preferences/instructions injected into
//! future system prompts) and the operator knowledge base.

pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::MemoryError;
pub use manager::MemoryManager;
pub use types::{MemoryCategory, MemorySource};
