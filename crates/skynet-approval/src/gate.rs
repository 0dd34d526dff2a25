use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use dashmap::DashMap;
use skynet_core::types::ConversationKey;
use tracing::{info, instrument};

use crate::detect::detect;
use crate::error::Result;
use crate::types::{Detection, PendingApproval, Resolution};

/// Per-conversation approval state plus a permanent, config-persisted
/// allowlist of pattern keys that are never gated again.
///
/// Two tiers, deliberately kept separate:
/// - `approved_patterns`: in-memory, cleared when the session ends
///   (`clear_session`).
/// - `permanent_allowlist`: persisted to disk, survives restarts, set only
///   by an explicit operator action.
pub struct ApprovalGate {
    pending: DashMap<ConversationKey, PendingApproval>,
    approved_patterns: DashMap<ConversationKey, HashSet<String>>,
    permanent_allowlist: RwLock<HashSet<String>>,
    allowlist_path: PathBuf,
}

impl ApprovalGate {
    /// Load (or initialise) the gate, reading the persisted allowlist from
    /// `allowlist_path` if it exists.
    pub fn new(allowlist_path: impl AsRef<Path>) -> Result<Self> {
        let path = allowlist_path.as_ref().to_path_buf();
        let permanent = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            HashSet::new()
        };
        Ok(Self {
            pending: DashMap::new(),
            approved_patterns: DashMap::new(),
            permanent_allowlist: RwLock::new(permanent),
            allowlist_path: path,
        })
    }

    /// Detect danger in `command` for the given conversation, consulting the
    /// permanent allowlist and per-session approvals before reporting it as
    /// pending.
    #[instrument(skip(self, command), fields(key = %key))]
    pub fn check(&self, key: &ConversationKey, command: &str) -> Detection {
        let detection = detect(command);
        let Some(pattern_key) = detection.pattern_key.as_deref() else {
            return detection;
        };

        if self.permanent_allowlist.read().unwrap().contains(pattern_key) {
            return Detection::safe();
        }
        if self.is_approved(key, pattern_key) {
            return Detection::safe();
        }
        detection
    }

    /// Record a command as pending approval for `key`. Overwrites any
    /// previous pending entry for that conversation.
    pub fn submit_pending(&self, key: &ConversationKey, command: &str, pattern_key: &str) {
        self.pending.insert(
            key.clone(),
            PendingApproval {
                command: command.to_string(),
                pattern_key: pattern_key.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        );
    }

    pub fn has_pending(&self, key: &ConversationKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Remove and return the pending approval for `key`, if any.
    pub fn pop_pending(&self, key: &ConversationKey) -> Option<PendingApproval> {
        self.pending.remove(key).map(|(_, v)| v)
    }

    /// Resolve the pending approval for `key`. Returns the command that was
    /// approved/denied, or `None` if nothing was pending.
    #[instrument(skip(self), fields(key = %key, resolution = ?resolution))]
    pub fn resolve(&self, key: &ConversationKey, resolution: Resolution) -> Option<PendingApproval> {
        let pending = self.pop_pending(key)?;
        match resolution {
            Resolution::AllowOnce | Resolution::Deny => {}
            Resolution::AllowAlways => {
                self.approve_session(key, &pending.pattern_key);
            }
        }
        Some(pending)
    }

    /// Mark `pattern_key` as approved for the rest of this conversation's
    /// live session (cleared by `clear_session`, not persisted).
    pub fn approve_session(&self, key: &ConversationKey, pattern_key: &str) {
        self.approved_patterns
            .entry(key.clone())
            .or_default()
            .insert(pattern_key.to_string());
    }

    pub fn is_approved(&self, key: &ConversationKey, pattern_key: &str) -> bool {
        self.approved_patterns
            .get(key)
            .map(|set| set.contains(pattern_key))
            .unwrap_or(false)
    }

    /// Forget all session-scoped approvals for `key` (session reset/end).
    pub fn clear_session(&self, key: &ConversationKey) {
        self.approved_patterns.remove(key);
        self.pending.remove(key);
    }

    /// Permanently allow `pattern_key`, persisting to disk immediately.
    #[instrument(skip(self), fields(pattern_key))]
    pub fn allow_permanently(&self, pattern_key: &str) -> Result<()> {
        {
            let mut set = self.permanent_allowlist.write().unwrap();
            set.insert(pattern_key.to_string());
        }
        self.persist_allowlist()?;
        info!(pattern_key, "pattern added to permanent allowlist");
        Ok(())
    }

    fn persist_allowlist(&self) -> Result<()> {
        let set = self.permanent_allowlist.read().unwrap();
        let json = serde_json::to_string_pretty(&*set)?;
        if let Some(parent) = self.allowlist_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.allowlist_path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> (ApprovalGate, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let gate = ApprovalGate::new(dir.path().join("allowlist.json")).unwrap();
        (gate, dir)
    }

    fn key() -> ConversationKey {
        ConversationKey::new("telegram", "1", None)
    }

    #[test]
    fn safe_command_never_pends() {
        let (gate, _dir) = gate();
        let d = gate.check(&key(), "ls -la");
        assert!(!d.is_dangerous);
    }

    #[test]
    fn dangerous_command_stays_pending_until_resolved() {
        let (gate, _dir) = gate();
        let k = key();
        let d = gate.check(&k, "rm -rf /");
        assert!(d.is_dangerous);
        gate.submit_pending(&k, "rm -rf /", d.pattern_key.as_deref().unwrap());
        assert!(gate.has_pending(&k));
        let resolved = gate.resolve(&k, Resolution::AllowOnce).unwrap();
        assert_eq!(resolved.pattern_key, "rm_recursive");
        assert!(!gate.has_pending(&k));
    }

    #[test]
    fn allow_always_approves_pattern_for_session() {
        let (gate, _dir) = gate();
        let k = key();
        gate.submit_pending(&k, "sudo apt-get update", "sudo_escalation");
        gate.resolve(&k, Resolution::AllowAlways);
        assert!(gate.is_approved(&k, "sudo_escalation"));
        let d = gate.check(&k, "sudo apt-get upgrade");
        assert!(!d.is_dangerous, "approved pattern should no longer gate");
    }

    #[test]
    fn clear_session_forgets_approvals() {
        let (gate, _dir) = gate();
        let k = key();
        gate.approve_session(&k, "sudo_escalation");
        gate.clear_session(&k);
        assert!(!gate.is_approved(&k, "sudo_escalation"));
    }

    #[test]
    fn permanent_allowlist_survives_new_gate_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowlist.json");
        {
            let gate = ApprovalGate::new(&path).unwrap();
            gate.allow_permanently("sql_drop").unwrap();
        }
        let gate2 = ApprovalGate::new(&path).unwrap();
        let d = gate2.check(&key(), "DROP TABLE users;");
        assert!(!d.is_dangerous);
    }

    #[test]
    fn different_conversations_have_independent_pending_state() {
        let (gate, _dir) = gate();
        let a = ConversationKey::new("telegram", "1", None);
        let b = ConversationKey::new("discord", "1", None);
        gate.submit_pending(&a, "rm -rf /", "rm_recursive");
        assert!(gate.has_pending(&a));
        assert!(!gate.has_pending(&b));
    }
}
