//! Shared context interface for all channel adapters.
//!
//! `MessageContext` is the single trait that every channel host (gateway, discord,
//! future telegram, etc.) must implement. It replaces the old `DiscordAppContext`
//! and lets the pipeline crate stay channel-agnostic.

use std::sync::Arc;

use skynet_hooks::HookEngine;
use skynet_memory::manager::MemoryManager;
use skynet_scheduler::SchedulerHandle;
use skynet_sessions::SessionManager;
use skynet_terminal::manager::TerminalManager;
use skynet_terminal::{ProcessRegistry, SandboxBackend};
use skynet_users::resolver::UserResolver;

use crate::runtime::AgentRuntime;

/// Minimal context interface required by the shared message pipeline.
///
/// Implemented by `AppState` in `skynet-gateway` and any future channel host.
/// Defined here (in `skynet-agent`) to avoid circular dependency: all channel
/// crates depend on `skynet-agent`; `skynet-agent` depends only on `skynet-core`,
/// `skynet-hooks`, `skynet-memory`, `skynet-scheduler`, `skynet-sessions`,
/// `skynet-terminal`, and `skynet-users`.
pub trait MessageContext: Send + Sync {
    fn agent(&self) -> &AgentRuntime;
    fn memory(&self) -> &MemoryManager;
    /// Conversation-centric session/message/FTS store (transcript of record).
    fn sessions(&self) -> &SessionManager;
    fn terminal(&self) -> &tokio::sync::Mutex<TerminalManager>;
    /// Sandboxed command execution backend for the `terminal` tool, per the
    /// configured `sandbox.backend` (local/docker/singularity/ssh/cloud).
    fn sandbox(&self) -> &dyn SandboxBackend;
    /// Tracks background processes launched by tools, independent of the
    /// interactive PTY sessions `terminal()` manages.
    fn process_registry(&self) -> &ProcessRegistry;
    fn scheduler(&self) -> &SchedulerHandle;
    fn users(&self) -> &UserResolver;

    /// Names of channels currently connected to the gateway (for cross-channel sends).
    fn connected_channels(&self) -> Vec<String> {
        Vec::new()
    }

    /// Deliver a message to a recipient on another connected channel.
    fn send_to_channel(&self, channel: &str, recipient: &str, message: &str) -> Result<(), String> {
        let _ = (channel, recipient, message);
        Err("cross-channel delivery not supported by this host".to_string())
    }

    /// Gateway HTTP port, when this host exposes one.
    fn gateway_port(&self) -> Option<u16> {
        None
    }

    /// Path to the host's primary SQLite database, for diagnostics tools.
    fn database_path(&self) -> Option<&str> {
        None
    }

    /// The host's hook engine, when hook discovery is enabled. `None` hosts
    /// (tests, minimal embeddings) simply skip every `emit` call site.
    fn hooks(&self) -> Option<&Arc<HookEngine>> {
        None
    }
}
