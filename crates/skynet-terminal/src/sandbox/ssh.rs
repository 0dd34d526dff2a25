//! `SshBackend` — opens one SSH connection per `task_id`, multiplexed via a
//! control socket so subsequent commands reuse it instead of renegotiating.
//! Built in `LocalBackend`'s process-spawn-with-timeout shape, driving the
//! `ssh` binary.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::error::{Result, TerminalError};

use super::common::{apply_sudo_transform, run_child_with_cancellation};
use super::{ExecOutcome, ExecRequest, SandboxBackend};

pub struct SshBackend {
    host: String,
    user: String,
    port: u16,
    key_path: Option<String>,
    sandbox_root: String,
    sudo_password: Option<String>,
    /// `task_id`s whose control-master connection has been opened.
    open_masters: Mutex<HashSet<String>>,
}

impl SshBackend {
    pub fn new(
        host: String,
        user: String,
        port: u16,
        key_path: Option<String>,
        sandbox_root: String,
        sudo_password: Option<String>,
    ) -> Self {
        Self {
            host,
            user,
            port,
            key_path,
            sandbox_root,
            sudo_password,
            open_masters: Mutex::new(HashSet::new()),
        }
    }

    fn control_path(&self, task_id: &str) -> String {
        format!("{}/ssh/{task_id}.sock", self.sandbox_root)
    }

    fn base_args(&self, task_id: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path(task_id)),
            "-o".to_string(),
            "ControlPersist=600".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }

    async fn ensure_master(&self, task_id: &str) -> Result<()> {
        if self.open_masters.lock().unwrap().contains(task_id) {
            return Ok(());
        }
        let sock_dir = format!("{}/ssh", self.sandbox_root);
        std::fs::create_dir_all(&sock_dir)
            .map_err(|e| TerminalError::BackendUnavailable(format!("control-socket dir create failed: {e}")))?;

        let mut args = self.base_args(task_id);
        args.push("-fN".to_string()); // background, no remote command
        args.push(format!("{}@{}", self.user, self.host));

        let status = AsyncCommand::new("ssh")
            .args(&args)
            .status()
            .await
            .map_err(|e| TerminalError::BackendUnavailable(format!("ssh control-master failed: {e}")))?;

        if !status.success() {
            return Err(TerminalError::BackendUnavailable(format!(
                "ssh control-master exited with {status}"
            )));
        }

        info!(task_id, host = %self.host, "ssh control master established");
        self.open_masters.lock().unwrap().insert(task_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl SandboxBackend for SshBackend {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutcome> {
        self.ensure_master(&request.task_id).await?;

        let (command, sudo_stdin) = apply_sudo_transform(&request.command, self.sudo_password.as_deref());
        let cwd = request.cwd.as_deref().unwrap_or("~");
        let remote_command = format!("cd {cwd} && {command}");

        debug!(task_id = %request.task_id, host = %self.host, "ssh exec: {remote_command}");

        let mut args = self.base_args(&request.task_id);
        args.push(format!("{}@{}", self.user, self.host));
        args.push(remote_command);

        let mut cmd = AsyncCommand::new("ssh");
        cmd.args(&args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let needs_stdin = sudo_stdin.is_some() || request.stdin.is_some();
        if needs_stdin {
            cmd.stdin(std::process::Stdio::piped());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TerminalError::PtySpawn(format!("ssh exec spawn failed: {e}")))?;

        if needs_stdin {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                if let Some(pw) = &sudo_stdin {
                    let _ = stdin.write_all(format!("{pw}\n").as_bytes()).await;
                }
                if let Some(payload) = &request.stdin {
                    let _ = stdin.write_all(payload.as_bytes()).await;
                }
            }
        }

        run_child_with_cancellation(child, request.timeout_secs, request.cancel).await
    }

    async fn cleanup(&self, task_id: &str) -> Result<()> {
        if !self.open_masters.lock().unwrap().remove(task_id) {
            return Ok(());
        }
        let mut args = self.base_args(task_id);
        args.push("-O".to_string());
        args.push("exit".to_string());
        args.push(format!("{}@{}", self.user, self.host));
        let _ = AsyncCommand::new("ssh")
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        info!(task_id, host = %self.host, "ssh control master closed");
        Ok(())
    }

    fn name(&self) -> &str {
        "ssh"
    }
}
