//! Sandbox execution backends.
//!
//! A sandbox session is a reference to a live execution environment pinned
//! to a `task_id`, owned by exactly one conversation at a time. Every
//! backend variant implements the same [`SandboxBackend`] trait so the
//! `terminal` tool can route to whichever one is configured without caring
//! about the transport underneath — same shape as
//! [`crate::manager::TerminalManager::exec`], generalized behind a trait
//! object the way `skynet-agent::provider::LlmProvider` generalizes chat
//! providers.

pub mod cloud;
pub mod common;
pub mod docker;
pub mod local;
pub mod singularity;
pub mod ssh;

pub use cloud::CloudBackend;
pub use docker::DockerBackend;
pub use local::LocalBackend;
pub use singularity::SingularityBackend;
pub use ssh::SshBackend;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A single command dispatched to a sandbox backend.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Identifies which persistent sandbox (container/instance/connection)
    /// owns this command. Stable for the lifetime of a conversation.
    pub task_id: String,
    pub command: String,
    pub cwd: Option<String>,
    pub timeout_secs: u64,
    pub stdin: Option<String>,
    /// Checked at least every 200ms while the command is in flight.
    pub cancel: CancellationToken,
}

impl ExecRequest {
    pub fn new(task_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            command: command.into(),
            cwd: None,
            timeout_secs: 30,
            stdin: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of a sandbox command. `output` is merged stdout+stderr with CRs
/// normalized to `\n`, matching what every backend below produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub output: String,
    pub returncode: i32,
}

/// Process exited normally after a timeout — the well-known shell convention.
pub const RETURNCODE_TIMEOUT: i32 = 124;
/// Process was killed due to cancellation (SIGINT convention, 128+2).
pub const RETURNCODE_INTERRUPTED: i32 = 130;

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Run `request.command` in the sandbox session for `request.task_id`,
    /// creating that session on first use.
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutcome>;

    /// Tear down the sandbox session for `task_id`. Idempotent — calling it
    /// twice, or on a `task_id` that was never created, is not an error.
    async fn cleanup(&self, task_id: &str) -> Result<()>;

    /// Human-readable backend name, for logging and tool-result metadata.
    fn name(&self) -> &str;
}

/// Build the configured backend. One call at startup; the returned trait
/// object is shared (behind an `Arc`) by every conversation's `terminal`
/// tool invocation.
pub fn build_backend(config: &skynet_core::config::SandboxConfig) -> Box<dyn SandboxBackend> {
    use skynet_core::config::SandboxBackendKind;

    match config.backend {
        SandboxBackendKind::Local => Box::new(LocalBackend::new(config.sudo_password.clone())),
        SandboxBackendKind::Docker => Box::new(DockerBackend::new(
            config.docker.image.clone(),
            config.sandbox_root.clone(),
            config.sudo_password.clone(),
        )),
        SandboxBackendKind::Singularity => Box::new(SingularityBackend::new(
            config.singularity.image.clone(),
            config.sandbox_root.clone(),
            config.sudo_password.clone(),
        )),
        SandboxBackendKind::Ssh => {
            let ssh = config.ssh.clone().expect("sandbox.ssh must be set when backend = \"ssh\"");
            Box::new(SshBackend::new(
                ssh.host,
                ssh.user,
                ssh.port,
                ssh.key_path,
                config.sandbox_root.clone(),
                config.sudo_password.clone(),
            ))
        }
        SandboxBackendKind::Cloud => {
            let cloud = config.cloud.clone().expect("sandbox.cloud must be set when backend = \"cloud\"");
            Box::new(CloudBackend::new(cloud.base_url, cloud.api_key))
        }
    }
}
