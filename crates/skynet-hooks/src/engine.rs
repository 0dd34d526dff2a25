use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{HookError, Result};
use crate::types::{HookInvocation, HookManifest, HookOutcome, LoadedHook};

/// Default wall-clock budget for a single handler invocation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory/manifest-based hook registry.
///
/// Hooks are not registered in-process: each hook is a directory under
/// `hooks_root` containing a `HOOK.yaml` manifest and a `handler.py`. At
/// startup (and on `/reload` or SIGHUP) [`discover_and_load`] rescans the
/// directory; [`emit`] invokes every matching handler as a subprocess,
/// passing the event name and a JSON context object on stdin.
pub struct HookEngine {
    hooks_root: PathBuf,
    loaded: RwLock<Vec<LoadedHook>>,
    python: String,
}

impl HookEngine {
    /// Create an engine pointed at `hooks_root`. Call [`discover_and_load`]
    /// before emitting — a freshly constructed engine has no hooks loaded.
    pub fn new(hooks_root: impl Into<PathBuf>) -> Self {
        Self {
            hooks_root: hooks_root.into(),
            loaded: RwLock::new(Vec::new()),
            python: "python3".to_string(),
        }
    }

    /// Override the interpreter used to invoke `handler.py` (tests only —
    /// production always uses `python3`).
    #[cfg(test)]
    fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Rescan `hooks_root`, replacing the loaded hook set. A subdirectory is
    /// skipped (with a log line, never an error) if it has no `HOOK.yaml`, no
    /// `handler.py`, an empty `events` list, or a `handler.py` with no
    /// `handle(` function definition. A missing `hooks_root` is not an error —
    /// it just means no hooks are loaded.
    pub fn discover_and_load(&self) -> Result<()> {
        let mut found = Vec::new();

        let entries = match std::fs::read_dir(&self.hooks_root) {
            Ok(entries) => entries,
            Err(_) => {
                debug!(root = %self.hooks_root.display(), "hooks root does not exist, no hooks loaded");
                *self.loaded.write().expect("hook registry poisoned") = found;
                return Ok(());
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            match load_one(&dir) {
                Some(hook) => {
                    info!(name = %hook.manifest.name, events = ?hook.manifest.events, "hook loaded");
                    found.push(hook);
                }
                None => {
                    debug!(dir = %dir.display(), "skipped invalid hook directory");
                }
            }
        }

        info!(count = found.len(), root = %self.hooks_root.display(), "hooks discovered");
        *self.loaded.write().expect("hook registry poisoned") = found;
        Ok(())
    }

    /// Manifests of every currently loaded hook, for diagnostics (`/status`, tests).
    pub fn loaded_manifests(&self) -> Vec<HookManifest> {
        self.loaded
            .read()
            .expect("hook registry poisoned")
            .iter()
            .map(|h| h.manifest.clone())
            .collect()
    }

    /// Emit `event` with `context` to every hook registered for it (exact
    /// match or `prefix:*` wildcard), in registration order. A handler's
    /// failure — non-zero exit, timeout, spawn error — is logged and does
    /// not stop the remaining handlers from running.
    pub async fn emit(&self, event: &str, context: serde_json::Value) -> Vec<HookOutcome> {
        let matching: Vec<LoadedHook> = {
            let loaded = self.loaded.read().expect("hook registry poisoned");
            loaded.iter().filter(|h| h.matches(event)).cloned().collect()
        };

        let mut outcomes = Vec::with_capacity(matching.len());
        for hook in matching {
            let started = Instant::now();
            let result =
                invoke_handler(&self.python, &hook.handler_path, event, context.clone()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(()) => {
                    debug!(hook = %hook.manifest.name, duration_ms, event, "hook handler completed")
                }
                Err(e) => {
                    warn!(hook = %hook.manifest.name, duration_ms, event, error = %e, "hook handler failed, continuing")
                }
            }

            outcomes.push(HookOutcome {
                hook_name: hook.manifest.name,
                duration_ms,
                result: result.map_err(|e| e.to_string()),
            });
        }
        outcomes
    }
}

impl Clone for LoadedHook {
    fn clone(&self) -> Self {
        Self {
            manifest: self.manifest.clone(),
            dir: self.dir.clone(),
            handler_path: self.handler_path.clone(),
        }
    }
}

/// Load and validate one hook directory. Returns `None` (never an error) on
/// any structural problem — discovery must keep scanning the rest.
fn load_one(dir: &Path) -> Option<LoadedHook> {
    let manifest_path = dir.join("HOOK.yaml");
    let handler_path = dir.join("handler.py");

    let manifest_text = std::fs::read_to_string(&manifest_path).ok()?;
    let manifest: HookManifest = serde_yaml::from_str(&manifest_text).ok()?;

    if manifest.events.is_empty() {
        return None;
    }
    if !handler_path.is_file() {
        return None;
    }
    let handler_src = std::fs::read_to_string(&handler_path).ok()?;
    if !handler_src.contains("def handle(") {
        return None;
    }

    Some(LoadedHook {
        manifest,
        dir: dir.to_path_buf(),
        handler_path,
    })
}

/// Spawn `python3 <handler_path>`, write the invocation JSON to stdin, and
/// wait (bounded by [`DEFAULT_TIMEOUT`]) for it to exit. Handler exceptions
/// surface as a non-zero exit status, which this maps to an error without
/// ever panicking or propagating out of `emit`.
async fn invoke_handler(
    python: &str,
    handler_path: &Path,
    event: &str,
    context: serde_json::Value,
) -> Result<()> {
    let invocation = HookInvocation {
        event_type: event,
        context,
    };
    let payload = serde_json::to_vec(&invocation)
        .map_err(|e| HookError::ExecutionFailed(format!("failed to encode context: {e}")))?;

    let mut child = Command::new(python)
        .arg(handler_path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| HookError::ExecutionFailed(format!("failed to spawn handler: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(&payload).await;
    }

    let output = tokio::time::timeout(DEFAULT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| HookError::Timeout {
            ms: DEFAULT_TIMEOUT.as_millis() as u64,
        })?
        .map_err(|e| HookError::ExecutionFailed(format!("failed to wait on handler: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HookError::ExecutionFailed(format!(
            "handler exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_hook(root: &Path, name: &str, events: &str, handler_body: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("HOOK.yaml"),
            format!("name: {name}\ndescription: test\nevents: {events}\n"),
        )
        .unwrap();
        std::fs::write(dir.join("handler.py"), handler_body).unwrap();
    }

    #[test]
    fn discovers_valid_hook() {
        let tmp = tempfile::tempdir().unwrap();
        write_hook(
            tmp.path(),
            "my-hook",
            "[\"agent:start\"]",
            "def handle(event_type, context):\n    pass\n",
        );

        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();
        let manifests = engine.loaded_manifests();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "my-hook");
    }

    #[test]
    fn skips_missing_hook_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bad-hook");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("handler.py"), "def handle(e, c): pass\n").unwrap();

        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();
        assert!(engine.loaded_manifests().is_empty());
    }

    #[test]
    fn skips_missing_handler_py() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bad-hook");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("HOOK.yaml"), "name: bad\nevents: ['agent:start']\n").unwrap();

        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();
        assert!(engine.loaded_manifests().is_empty());
    }

    #[test]
    fn skips_empty_events() {
        let tmp = tempfile::tempdir().unwrap();
        write_hook(tmp.path(), "empty", "[]", "def handle(e, c): pass\n");

        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();
        assert!(engine.loaded_manifests().is_empty());
    }

    #[test]
    fn skips_missing_handle_function() {
        let tmp = tempfile::tempdir().unwrap();
        write_hook(
            tmp.path(),
            "no-handle",
            "[\"agent:start\"]",
            "def something_else(): pass\n",
        );

        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();
        assert!(engine.loaded_manifests().is_empty());
    }

    #[test]
    fn nonexistent_root_loads_empty() {
        let engine = HookEngine::new("/nonexistent/hooks/root/path");
        engine.discover_and_load().unwrap();
        assert!(engine.loaded_manifests().is_empty());
    }

    #[test]
    fn multiple_hooks_all_discovered() {
        let tmp = tempfile::tempdir().unwrap();
        write_hook(tmp.path(), "hook-a", "[\"agent:start\"]", "def handle(e, c): pass\n");
        write_hook(
            tmp.path(),
            "hook-b",
            "[\"session:start\", \"session:reset\"]",
            "def handle(e, c): pass\n",
        );

        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();
        assert_eq!(engine.loaded_manifests().len(), 2);
    }

    #[test]
    fn wildcard_matches_prefixed_event() {
        let hook = LoadedHook {
            manifest: HookManifest {
                name: "wildcard-hook".to_string(),
                description: None,
                events: vec!["command:*".to_string()],
            },
            dir: PathBuf::new(),
            handler_path: PathBuf::new(),
        };
        assert!(hook.matches("command:reset"));
        assert!(!hook.matches("agent:start"));
    }

    #[tokio::test]
    async fn emit_calls_matching_handler() {
        let tmp = tempfile::tempdir().unwrap();
        let out_path = tmp.path().join("out.txt");
        write_hook(
            tmp.path(),
            "sync-hook",
            "[\"agent:start\"]",
            &format!(
                "import sys, json\nwith open(r'{}', 'w') as f:\n    f.write(sys.stdin.read())\n",
                out_path.display()
            ),
        );

        let engine = HookEngine::new(tmp.path()).with_python("python3");
        engine.discover_and_load().unwrap();

        let outcomes = engine
            .emit("agent:start", serde_json::json!({"test": true}))
            .await;
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test]
    async fn emit_with_no_matching_hooks_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();
        let outcomes = engine.emit("unknown:event", serde_json::json!({})).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn handler_error_does_not_propagate() {
        let tmp = tempfile::tempdir().unwrap();
        write_hook(
            tmp.path(),
            "bad-hook",
            "[\"agent:start\"]",
            "raise ValueError('boom')\ndef handle(event_type, context):\n    pass\n",
        );

        let engine = HookEngine::new(tmp.path());
        engine.discover_and_load().unwrap();

        let outcomes = engine.emit("agent:start", serde_json::json!({})).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
    }
}
