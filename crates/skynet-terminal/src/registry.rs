//! Process registry (C2) — tracks processes a tool asked to run in the
//! background, grouped by the conversation's `task_id`.
//!
//! Grounded on [`crate::manager::TerminalManager`]'s
//! `jobs: HashMap<JobId, Arc<Mutex<BackgroundJob>>>` + `JobStatus` shape,
//! extended with the output-buffer cap/truncation flag, `kill_all(task_id)`,
//! and TTL/cap-bounded `prune()` the teacher's job map does not have. The
//! capped-append idiom (drop oldest bytes, set a flag) mirrors
//! [`crate::session::PtySession`]'s output ring buffer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};
use uuid::Uuid;

/// Output buffer cap per process record (200 KiB), per spec recommendation.
const DEFAULT_OUTPUT_CAP_BYTES: usize = 200 * 1024;
/// Exited records are pruned after this many seconds (15 minutes).
const DEFAULT_TTL_SECS: u64 = 15 * 60;
/// Global cap on active+exited records tracked at once.
const DEFAULT_MAX_RECORDS: usize = 64;

/// Opaque identifier for a registered background process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessId(pub String);

impl ProcessId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `{id, command, task_id, started_at, pid, exited, exit_code, output_buffer}`
/// per spec's process-record shape, plus `truncated`.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub command: String,
    pub task_id: String,
    pub started_at: u64,
    pub pid: Option<u32>,
    pub exited: bool,
    pub exit_code: Option<i32>,
    pub output_buffer: String,
    pub truncated: bool,
    exited_at: Option<u64>,
}

pub struct ProcessRegistry {
    records: Mutex<HashMap<ProcessId, ProcessRecord>>,
    output_cap_bytes: usize,
    ttl_secs: u64,
    max_records: usize,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            ttl_secs: DEFAULT_TTL_SECS,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    pub fn register(&self, command: impl Into<String>, task_id: impl Into<String>, pid: Option<u32>) -> ProcessId {
        let id = ProcessId::new();
        let record = ProcessRecord {
            id: id.clone(),
            command: command.into(),
            task_id: task_id.into(),
            started_at: now_secs(),
            pid,
            exited: false,
            exit_code: None,
            output_buffer: String::new(),
            truncated: false,
            exited_at: None,
        };
        let mut guard = self.records.lock().unwrap();
        guard.insert(id.clone(), record);
        drop(guard);
        self.prune();
        id
    }

    pub fn mark_exited(&self, id: &ProcessId, exit_code: i32) {
        let mut guard = self.records.lock().unwrap();
        if let Some(record) = guard.get_mut(id) {
            record.exited = true;
            record.exit_code = Some(exit_code);
            record.exited_at = Some(now_secs());
            debug!(id = %id, exit_code, "process marked exited");
        }
    }

    /// Append `bytes` to the record's output buffer, dropping the oldest
    /// bytes (not the newest) if the cap is exceeded and setting `truncated`.
    pub fn append_output(&self, id: &ProcessId, bytes: &str) {
        let mut guard = self.records.lock().unwrap();
        if let Some(record) = guard.get_mut(id) {
            record.output_buffer.push_str(bytes);
            if record.output_buffer.len() > self.output_cap_bytes {
                let excess = record.output_buffer.len() - self.output_cap_bytes;
                record.output_buffer.drain(..excess);
                record.truncated = true;
            }
        }
    }

    pub fn get(&self, id: &ProcessId) -> Option<ProcessRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn list_for_task(&self, task_id: &str) -> Vec<ProcessRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Best-effort SIGTERM-then-SIGKILL every running process for `task_id`.
    /// Never blocks: the grace period is a spawned sleep, not an await here.
    pub fn kill_all(&self, task_id: &str) {
        let pids: Vec<u32> = {
            let guard = self.records.lock().unwrap();
            guard
                .values()
                .filter(|r| r.task_id == task_id && !r.exited)
                .filter_map(|r| r.pid)
                .collect()
        };

        if pids.is_empty() {
            return;
        }

        info!(task_id, count = pids.len(), "kill_all: sending SIGTERM");
        #[cfg(unix)]
        for pid in &pids {
            unsafe {
                libc::kill(*pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            #[cfg(unix)]
            for pid in &pids {
                unsafe {
                    libc::kill(*pid as libc::pid_t, libc::SIGKILL);
                }
            }
            debug!(task_id, "kill_all: grace period elapsed, SIGKILL sent");
        });
    }

    /// Remove exited records older than the TTL, then — if still over the
    /// global cap — evict oldest exited first, then oldest active.
    pub fn prune(&self) {
        let now = now_secs();
        let mut guard = self.records.lock().unwrap();

        let expired: Vec<ProcessId> = guard
            .values()
            .filter(|r| r.exited && r.exited_at.is_some_and(|t| now.saturating_sub(t) > self.ttl_secs))
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            guard.remove(id);
        }

        if guard.len() <= self.max_records {
            return;
        }

        let mut candidates: Vec<ProcessId> = guard
            .values()
            .filter(|r| r.exited)
            .map(|r| r.id.clone())
            .collect();
        candidates.sort_by_key(|id| guard.get(id).and_then(|r| r.exited_at).unwrap_or(0));

        let mut over = guard.len() - self.max_records;
        for id in candidates {
            if over == 0 {
                break;
            }
            guard.remove(&id);
            over -= 1;
        }

        if over > 0 {
            let mut active: Vec<ProcessId> = guard
                .values()
                .filter(|r| !r.exited)
                .map(|r| r.id.clone())
                .collect();
            active.sort_by_key(|id| guard.get(id).map(|r| r.started_at).unwrap_or(0));
            for id in active {
                if over == 0 {
                    break;
                }
                guard.remove(&id);
                over -= 1;
            }
        }
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_mark_exited() {
        let reg = ProcessRegistry::new();
        let id = reg.register("sleep 5", "task-1", Some(123));
        let record = reg.get(&id).unwrap();
        assert!(!record.exited);
        reg.mark_exited(&id, 0);
        let record = reg.get(&id).unwrap();
        assert!(record.exited);
        assert_eq!(record.exit_code, Some(0));
    }

    #[test]
    fn append_output_drops_oldest_past_cap() {
        let reg = ProcessRegistry {
            output_cap_bytes: 10,
            ..ProcessRegistry::new()
        };
        let id = reg.register("yes", "task-1", None);
        reg.append_output(&id, "0123456789");
        reg.append_output(&id, "ABCDE");
        let record = reg.get(&id).unwrap();
        assert!(record.truncated);
        assert_eq!(record.output_buffer.len(), 10);
        assert!(record.output_buffer.ends_with("ABCDE"));
    }

    #[test]
    fn list_for_task_filters_by_task_id() {
        let reg = ProcessRegistry::new();
        reg.register("a", "task-1", None);
        reg.register("b", "task-2", None);
        assert_eq!(reg.list_for_task("task-1").len(), 1);
        assert_eq!(reg.list_for_task("task-2").len(), 1);
    }

    #[test]
    fn prune_evicts_oldest_exited_first_over_cap() {
        let reg = ProcessRegistry {
            max_records: 2,
            ..ProcessRegistry::new()
        };
        let a = reg.register("a", "task-1", None);
        reg.mark_exited(&a, 0);
        let _b = reg.register("b", "task-1", None);
        let _c = reg.register("c", "task-1", None);
        reg.prune();
        assert!(reg.get(&a).is_none(), "oldest exited record should be evicted first");
    }
}
