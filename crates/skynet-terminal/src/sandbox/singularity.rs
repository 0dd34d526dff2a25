//! `SingularityBackend` — one persistent Singularity/Apptainer *instance*
//! per `task_id`, booted with `--containall --no-home` for full host
//! isolation. Built in [`super::local::LocalBackend`]'s idiom, driving the
//! `singularity` binary instead of the bare command.
//!
//! `singularity exec` has no stdin-piping flag, so `stdin` is delivered via
//! [`super::common::synthesize_heredoc`] instead of a piped child stdin.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::error::{Result, TerminalError};

use super::common::{apply_sudo_transform, run_child_with_cancellation, synthesize_heredoc};
use super::{ExecOutcome, ExecRequest, SandboxBackend};

pub struct SingularityBackend {
    singularity_bin: String,
    image: String,
    sandbox_root: String,
    sudo_password: Option<String>,
    /// Instance name and whether its overlay has been built, per task.
    instances: Mutex<HashMap<String, String>>,
    /// Cached SIF path per source image URL — built once, reused across tasks.
    sif_cache: Mutex<HashMap<String, String>>,
}

impl SingularityBackend {
    pub fn new(image: String, sandbox_root: String, sudo_password: Option<String>) -> Self {
        Self {
            singularity_bin: "singularity".to_string(),
            image,
            sandbox_root,
            sudo_password,
            instances: Mutex::new(HashMap::new()),
            sif_cache: Mutex::new(HashMap::new()),
        }
    }

    fn overlay_dir(&self, task_id: &str) -> String {
        format!("{}/singularity/overlays/{task_id}", self.sandbox_root)
    }

    fn instance_name(&self, task_id: &str) -> String {
        format!("skynet-{task_id}")
    }

    async fn ensure_sif(&self) -> Result<String> {
        if let Some(path) = self.sif_cache.lock().unwrap().get(&self.image).cloned() {
            return Ok(path);
        }
        let sif_dir = format!("{}/singularity/images", self.sandbox_root);
        std::fs::create_dir_all(&sif_dir)
            .map_err(|e| TerminalError::BackendUnavailable(format!("sif dir create failed: {e}")))?;
        let sif_path = format!("{sif_dir}/{}.sif", sanitize_filename(&self.image));

        if !std::path::Path::new(&sif_path).exists() {
            let status = AsyncCommand::new(&self.singularity_bin)
                .args(["build", &sif_path, &self.image])
                .status()
                .await
                .map_err(|e| TerminalError::BackendUnavailable(format!("singularity build failed: {e}")))?;
            if !status.success() {
                return Err(TerminalError::BackendUnavailable(format!(
                    "singularity build exited with {status}"
                )));
            }
        }

        self.sif_cache.lock().unwrap().insert(self.image.clone(), sif_path.clone());
        Ok(sif_path)
    }

    async fn ensure_instance(&self, task_id: &str) -> Result<String> {
        if let Some(name) = self.instances.lock().unwrap().get(task_id).cloned() {
            return Ok(name);
        }

        let sif_path = self.ensure_sif().await?;
        let name = self.instance_name(task_id);
        let overlay = self.overlay_dir(task_id);
        std::fs::create_dir_all(&overlay)
            .map_err(|e| TerminalError::BackendUnavailable(format!("overlay create failed: {e}")))?;

        let status = AsyncCommand::new(&self.singularity_bin)
            .args([
                "instance",
                "start",
                "--containall",
                "--no-home",
                "--overlay",
                &overlay,
                &sif_path,
                &name,
            ])
            .status()
            .await
            .map_err(|e| TerminalError::BackendUnavailable(format!("instance start failed: {e}")))?;

        if !status.success() {
            return Err(TerminalError::BackendUnavailable(format!(
                "singularity instance start exited with {status}"
            )));
        }

        info!(task_id, instance = %name, "singularity instance started");
        self.instances.lock().unwrap().insert(task_id.to_string(), name.clone());
        Ok(name)
    }
}

#[async_trait]
impl SandboxBackend for SingularityBackend {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutcome> {
        let instance = self.ensure_instance(&request.task_id).await?;
        let (command, sudo_stdin) = apply_sudo_transform(&request.command, self.sudo_password.as_deref());
        let cwd = request.cwd.as_deref().unwrap_or("/");
        let mut wrapped = format!("cd {cwd} && {command}");

        if let Some(stdin) = &request.stdin {
            wrapped = synthesize_heredoc(&wrapped, stdin);
        } else if let Some(pw) = &sudo_stdin {
            wrapped = synthesize_heredoc(&wrapped, pw);
        }

        debug!(task_id = %request.task_id, instance, "singularity exec: {wrapped}");

        let child = AsyncCommand::new(&self.singularity_bin)
            .args(["exec", &format!("instance://{instance}"), "sh", "-c", &wrapped])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| TerminalError::PtySpawn(format!("singularity exec spawn failed: {e}")))?;

        run_child_with_cancellation(child, request.timeout_secs, request.cancel).await
    }

    async fn cleanup(&self, task_id: &str) -> Result<()> {
        let Some(name) = self.instances.lock().unwrap().remove(task_id) else {
            return Ok(());
        };
        let _ = AsyncCommand::new(&self.singularity_bin)
            .args(["instance", "stop", &name])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        info!(task_id, instance = %name, "singularity instance stopped (overlay retained)");
        Ok(())
    }

    fn name(&self) -> &str {
        "singularity"
    }
}

fn sanitize_filename(image: &str) -> String {
    image.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_strips_special_chars() {
        assert_eq!(sanitize_filename("docker://ubuntu:24.04"), "docker___ubuntu_24_04");
    }
}
