//! `LocalBackend` — spawns commands directly on the host.
//!
//! Grounded almost verbatim on [`crate::manager::TerminalManager::exec`]:
//! same `sh -c` spawn, same timeout-race-via-oneshot shape (now generalized
//! to also race a cancellation token, see
//! [`super::common::run_child_with_cancellation`]).

use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::error::{Result, TerminalError};

use super::common::{apply_sudo_transform, is_denied_write, run_child_with_cancellation};
use super::{ExecOutcome, ExecRequest, SandboxBackend};

/// Executes every command directly on the host shell. Working directory
/// defaults to the caller's home when `cwd` is `~` or unset.
pub struct LocalBackend {
    sudo_password: Option<String>,
}

impl LocalBackend {
    pub fn new(sudo_password: Option<String>) -> Self {
        Self { sudo_password }
    }
}

#[async_trait]
impl SandboxBackend for LocalBackend {
    async fn execute(&self, request: ExecRequest) -> Result<ExecOutcome> {
        if let Some(path) = implied_write_target(&request.command) {
            if is_denied_write(&path) {
                return Err(TerminalError::DeniedWrite { path });
            }
        }

        let (command, sudo_stdin) = apply_sudo_transform(&request.command, self.sudo_password.as_deref());
        let cwd = resolve_cwd(request.cwd.as_deref());

        debug!(task_id = %request.task_id, "local sandbox exec: {command}");

        let mut cmd = AsyncCommand::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let needs_stdin = sudo_stdin.is_some() || request.stdin.is_some();
        if needs_stdin {
            cmd.stdin(std::process::Stdio::piped());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TerminalError::PtySpawn(format!("spawn failed: {e}")))?;

        if needs_stdin {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                if let Some(pw) = &sudo_stdin {
                    let _ = stdin.write_all(format!("{pw}\n").as_bytes()).await;
                }
                if let Some(payload) = &request.stdin {
                    let _ = stdin.write_all(payload.as_bytes()).await;
                }
                // Drop closes the pipe so the child sees EOF.
            }
        }

        run_child_with_cancellation(child, request.timeout_secs, request.cancel).await
    }

    async fn cleanup(&self, _task_id: &str) -> Result<()> {
        // Nothing to tear down — local commands leave no persistent session.
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn resolve_cwd(cwd: Option<&str>) -> String {
    match cwd {
        Some("~") | None => std::env::var("HOME").unwrap_or_else(|_| "/".to_string()),
        Some(path) if path.starts_with("~/") => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
            format!("{home}/{}", &path[2..])
        }
        Some(path) => path.to_string(),
    }
}

/// Best-effort detection of a redirect target (`> path` / `>> path`) so the
/// deny-list check in §4.1's Local bullet can run before spawning, without
/// needing a full shell parser.
fn implied_write_target(command: &str) -> Option<String> {
    for op in [">>", ">"] {
        if let Some(idx) = command.rfind(op) {
            let rest = command[idx + op.len()..].trim_start();
            let target: String = rest
                .chars()
                .take_while(|c| !c.is_whitespace())
                .collect();
            if !target.is_empty() {
                return Some(target);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_cwd_expands_tilde() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(resolve_cwd(Some("~")), "/home/tester");
        assert_eq!(resolve_cwd(Some("~/project")), "/home/tester/project");
        assert_eq!(resolve_cwd(Some("/tmp")), "/tmp");
    }

    #[test]
    fn implied_write_target_finds_redirect() {
        assert_eq!(implied_write_target("echo hi > /etc/passwd"), Some("/etc/passwd".to_string()));
        assert_eq!(implied_write_target("cat f >> /etc/shadow"), Some("/etc/shadow".to_string()));
        assert_eq!(implied_write_target("ls -la"), None);
    }

    #[tokio::test]
    async fn execute_rejects_denied_write() {
        let backend = LocalBackend::new(None);
        let req = ExecRequest::new("task-1", "echo pwned > /etc/shadow");
        let err = backend.execute(req).await.unwrap_err();
        assert!(matches!(err, TerminalError::DeniedWrite { .. }));
    }

    #[tokio::test]
    async fn execute_runs_plain_command() {
        let backend = LocalBackend::new(None);
        let req = ExecRequest::new("task-1", "echo hello");
        let outcome = backend.execute(req).await.unwrap();
        assert_eq!(outcome.returncode, 0);
        assert!(outcome.output.contains("hello"));
    }

    #[tokio::test]
    async fn execute_honors_cancellation() {
        let backend = LocalBackend::new(None);
        let mut req = ExecRequest::new("task-1", "sleep 5");
        let cancel = req.cancel.clone();
        let handle = tokio::spawn(async move { backend.execute(req).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.returncode, super::super::RETURNCODE_INTERRUPTED);
        assert!(outcome.output.contains("[Command interrupted]"));
    }
}
