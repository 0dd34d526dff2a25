//! `DockerBackend` — one container per `task_id`, commands run via
//! `docker exec`.
//!
//! No teacher precedent for a container driver; built in `LocalBackend`'s
//! process-spawn-with-timeout shape, substituting `docker exec` for the bare
//! `sh -c` invocation and adding container lifecycle management
//! (`docker run -d` on first use, `docker rm -f` on cleanup).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::error::{Result, TerminalError};

use super::common::{apply_sudo_transform, run_child_with_cancellation};
use super::{ExecOutcome, ExecRequest, SandboxBackend};

pub struct DockerBackend {
    docker_bin: String,
    image: String,
    sandbox_root: String,
    sudo_password: Option<String>,
    /// Container name per task, populated once `docker run` succeeds.
    containers: Mutex<HashMap<String, String>>,
}

impl DockerBackend {
    pub fn new(image: String, sandbox_root: String, sudo_password: Option<String>) -> Self {
        Self {
            docker_bin: "docker".to_string(),
            image,
            sandbox_root,
            sudo_password,
            containers: Mutex::new(HashMap::new()),
        }
    }

    fn workspace_dir(&self, task_id: &str) -> String {
        format!("{}/docker/{task_id}", self.sandbox_root)
    }

    fn container_name(&self, task_id: &str) -> String {
        format!("skynet-sandbox-{task_id}")
    }

    async fn ensure_container(&self, task_id: &str) -> Result<String> {
        if let Some(name) = self.containers.lock().unwrap().get(task_id).cloned() {
            return Ok(name);
        }

        let name = self.container_name(task_id);
        let workspace = self.workspace_dir(task_id);
        std::fs::create_dir_all(&workspace)
            .map_err(|e| TerminalError::BackendUnavailable(format!("workspace create failed: {e}")))?;

        let status = AsyncCommand::new(&self.docker_bin)
            .args([
                "run",
                "-d",
                "--name",
                &name,
                "-v",
                &format!("{workspace}:/workspace"),
                "-w",
                "/workspace",
                &self.image,
                "sleep",
                "infinity",
            ])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .status()
            .await
            .map_err(|e| TerminalError::BackendUnavailable(format!("docker run failed: {e}")))?;

        if !status.success() {
            return Err(TerminalError::BackendUnavailable(format!(
                "docker run exited with {status}"
            )));
        }

        info!(task_id, container = %name, "docker sandbox container started");
        self.containers.lock().unwrap().insert(task_id.to_string(), name.clone());
        Ok(name)
    }
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutcome> {
        let container = self.ensure_container(&request.task_id).await?;
        let (command, sudo_stdin) = apply_sudo_transform(&request.command, self.sudo_password.as_deref());
        let cwd = request.cwd.as_deref().unwrap_or("/workspace");
        let wrapped = format!("cd {cwd} && {command}");

        debug!(task_id = %request.task_id, container, "docker exec: {wrapped}");

        let mut cmd = AsyncCommand::new(&self.docker_bin);
        cmd.args(["exec", "-i", &container, "sh", "-c", &wrapped])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let needs_stdin = sudo_stdin.is_some() || request.stdin.is_some();
        if needs_stdin {
            cmd.stdin(std::process::Stdio::piped());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TerminalError::PtySpawn(format!("docker exec spawn failed: {e}")))?;

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
        let Some(name) = self.containers.lock().unwrap().remove(task_id) else {
            return Ok(());
        };
        let _ = AsyncCommand::new(&self.docker_bin)
            .args(["rm", "-f", &name])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        info!(task_id, container = %name, "docker sandbox container removed");
        Ok(())
    }

    fn name(&self) -> &str {
        "docker"
    }
}
