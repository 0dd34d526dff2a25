use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A `HOOK.yaml` manifest, parsed as-is.
///
/// `events` entries are either an exact event name (`agent:start`) or a
/// wildcard prefix (`command:*`, matching any `command:<name>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookManifest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// A successfully discovered and validated hook: manifest plus the resolved
/// path to its `handler.py`.
#[derive(Debug, Clone)]
pub struct LoadedHook {
    pub manifest: HookManifest,
    pub dir: PathBuf,
    pub handler_path: PathBuf,
}

impl LoadedHook {
    /// Whether this hook is registered for `event`, honoring `prefix:*` wildcards.
    pub fn matches(&self, event: &str) -> bool {
        self.manifest.events.iter().any(|pattern| {
            if let Some(prefix) = pattern.strip_suffix('*') {
                event.starts_with(prefix)
            } else {
                pattern == event
            }
        })
    }
}

/// The JSON payload written to a handler's stdin: `{"event_type": ..., "context": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct HookInvocation<'a> {
    pub event_type: &'a str,
    pub context: serde_json::Value,
}

/// Outcome of invoking one hook's handler for one event — used for logging
/// and for tests that want to assert a hook ran without shelling out.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub hook_name: String,
    pub duration_ms: u64,
    pub result: Result<(), String>,
}
