//! Free functions shared by every [`super::SandboxBackend`] — sudo
//! rewriting, the deny-listed-write check, heredoc synthesis for backends
//! without native stdin piping, and CR normalization. Kept outside the
//! trait as free functions, the same way `skynet-terminal::safety` keeps
//! command-safety checking outside `TerminalManager` rather than as a
//! trait default method.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, TerminalError};
use crate::sandbox::{ExecOutcome, RETURNCODE_INTERRUPTED, RETURNCODE_TIMEOUT};

/// Rewrite a `sudo …` command to pipe `password` via `sudo -S`, if one is
/// configured. Commands not starting with `sudo ` (after trimming) are
/// returned unchanged; so is `sudo …` when no password is configured — the
/// approval gate, not this function, decides whether `sudo` itself runs.
pub fn apply_sudo_transform(command: &str, sudo_password: Option<&str>) -> (String, Option<String>) {
    let trimmed = command.trim_start();
    let Some(password) = sudo_password else {
        return (command.to_string(), None);
    };
    if !trimmed.starts_with("sudo ") {
        return (command.to_string(), None);
    }
    let rest = &trimmed["sudo ".len()..];
    (format!("sudo -S {rest}"), Some(password.to_string()))
}

/// Paths a write must never touch, regardless of which backend performs it.
/// Enforced by the file-operations tool layer (`write_file`/`patch`), not by
/// the backend itself — a backend only shells out, it has no view of the
/// tool call's intended path vs. a path embedded in arbitrary shell text.
const DENIED_WRITE_PATTERNS: &[&str] = &[
    "/etc/shadow",
    "/etc/passwd",
    "/etc/sudoers",
    "/etc/sudoers.d/",
    "/etc/systemd/",
    ".bashrc",
    ".zshrc",
    ".profile",
    ".bash_profile",
    ".zprofile",
    ".netrc",
    ".npmrc",
    ".pypirc",
    ".pgpass",
    "/.ssh/",
    "/.aws/",
    "/.gnupg/",
    "/.kube/",
    "/.env",
];

/// Returns `true` if `path` matches one of the protected patterns above.
pub fn is_denied_write(path: &str) -> bool {
    DENIED_WRITE_PATTERNS.iter().any(|p| path.contains(p))
}

/// Build a heredoc wrapping `command` so `stdin` reaches it, for backends
/// (e.g. `singularity exec`) that have no native stdin-piping argument. The
/// EOF marker is a random UUID so it cannot collide with anything in
/// `stdin`.
pub fn synthesize_heredoc(command: &str, stdin: &str) -> String {
    let marker = format!("EOF_{}", Uuid::new_v4().simple());
    format!("{command} <<'{marker}'\n{stdin}\n{marker}\n")
}

/// Merge stdout+stderr the way every backend's `ExecOutcome::output` is
/// documented to, normalizing CRLF/lone-CR to `\n`.
pub fn merge_and_normalize(stdout: &str, stderr: &str) -> String {
    let mut merged = String::with_capacity(stdout.len() + stderr.len());
    merged.push_str(stdout);
    merged.push_str(stderr);
    normalize_crs(&merged)
}

fn normalize_crs(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drive an already-spawned child to completion, racing it against a
/// timeout and a cancellation token, and returning partial output on
/// either. Shared by every backend that drives its command via
/// `tokio::process::Command` (Local, Docker, Singularity, SSH).
///
/// `cancel.cancelled()` is awaited directly rather than polled on a fixed
/// interval — it resolves the instant the token is cancelled, which
/// satisfies (and comfortably beats) the "checked at least every 200ms"
/// interruption contract.
pub async fn run_child_with_cancellation(
    mut child: Child,
    timeout_secs: u64,
    cancel: CancellationToken,
) -> Result<ExecOutcome> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_buf = Arc::new(Mutex::new(String::new()));
    let err_buf = Arc::new(Mutex::new(String::new()));

    let out_task = stdout.map(|mut pipe| {
        let buf = Arc::clone(&out_buf);
        tokio::spawn(async move {
            let mut raw = Vec::new();
            let _ = pipe.read_to_end(&mut raw).await;
            buf.lock().unwrap().push_str(&String::from_utf8_lossy(&raw));
        })
    });
    let err_task = stderr.map(|mut pipe| {
        let buf = Arc::clone(&err_buf);
        tokio::spawn(async move {
            let mut raw = Vec::new();
            let _ = pipe.read_to_end(&mut raw).await;
            buf.lock().unwrap().push_str(&String::from_utf8_lossy(&raw));
        })
    });

    let timeout_duration = Duration::from_secs(timeout_secs.max(1));

    tokio::select! {
        res = tokio::time::timeout(timeout_duration, child.wait()) => match res {
            Ok(Ok(status)) => {
                join_readers(out_task, err_task).await;
                Ok(ExecOutcome {
                    output: merge_and_normalize(&out_buf.lock().unwrap(), &err_buf.lock().unwrap()),
                    returncode: status.code().unwrap_or(-1),
                })
            }
            Ok(Err(e)) => Err(TerminalError::IoError(e)),
            Err(_elapsed) => {
                kill_child(&mut child);
                join_readers(out_task, err_task).await;
                let partial = merge_and_normalize(&out_buf.lock().unwrap(), &err_buf.lock().unwrap());
                Ok(ExecOutcome {
                    output: format!("{partial}[Command timed out]"),
                    returncode: RETURNCODE_TIMEOUT,
                })
            }
        },
        _ = cancel.cancelled() => {
            kill_child(&mut child);
            join_readers(out_task, err_task).await;
            let partial = merge_and_normalize(&out_buf.lock().unwrap(), &err_buf.lock().unwrap());
            Ok(ExecOutcome {
                output: format!("{partial}[Command interrupted]"),
                returncode: RETURNCODE_INTERRUPTED,
            })
        }
    }
}

async fn join_readers(
    out_task: Option<tokio::task::JoinHandle<()>>,
    err_task: Option<tokio::task::JoinHandle<()>>,
) {
    if let Some(t) = out_task {
        let _ = t.await;
    }
    if let Some(t) = err_task {
        let _ = t.await;
    }
}

fn kill_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        return;
    }
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_transform_noop_without_password() {
        let (cmd, pw) = apply_sudo_transform("sudo apt-get update", None);
        assert_eq!(cmd, "sudo apt-get update");
        assert!(pw.is_none());
    }

    #[test]
    fn sudo_transform_rewrites_with_password() {
        let (cmd, pw) = apply_sudo_transform("sudo apt-get update", Some("hunter2"));
        assert_eq!(cmd, "sudo -S apt-get update");
        assert_eq!(pw.as_deref(), Some("hunter2"));
    }

    #[test]
    fn sudo_transform_ignores_non_sudo_commands() {
        let (cmd, pw) = apply_sudo_transform("ls -la", Some("hunter2"));
        assert_eq!(cmd, "ls -la");
        assert!(pw.is_none());
    }

    #[test]
    fn denied_write_matches_shadow() {
        assert!(is_denied_write("/etc/shadow"));
        assert!(is_denied_write("cat > /etc/shadow"));
    }

    #[test]
    fn denied_write_matches_ssh_keys() {
        assert!(is_denied_write("/home/alice/.ssh/id_rsa"));
    }

    #[test]
    fn denied_write_allows_ordinary_paths() {
        assert!(!is_denied_write("/home/alice/project/notes.md"));
    }

    #[test]
    fn heredoc_marker_not_contained_in_stdin() {
        let doc = synthesize_heredoc("python3", "print('EOF_1' in data)");
        // The marker is a fresh UUID each call; it cannot appear in this payload.
        let marker_line = doc.lines().last().unwrap();
        assert!(doc.matches(marker_line).count() >= 2);
    }

    #[test]
    fn merge_normalizes_crlf() {
        let out = merge_and_normalize("line1\r\nline2", "err\r");
        assert_eq!(out, "line1\nline2err\n");
    }
}
