use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, instrument};

use skynet_core::types::ConversationKey;

use crate::error::{Result, SessionError};
use crate::types::{new_session_id, Message, ReasoningItem, Role, Session, ToolCall, Transcript};

/// Thread-safe store for sessions, their transcripts, and full-text search
/// over message content.
///
/// Wraps a single SQLite connection in a `Mutex`; sufficient for a
/// single-node deployment where the gateway already serializes per-session
/// work behind a turn lock.
pub struct SessionManager {
    db: Mutex<Connection>,
}

impl SessionManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Return an existing active session for `key`, or create one.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get_or_create(&self, key: &ConversationKey, source: &str) -> Result<Session> {
        if let Some(session) = self.get(key)? {
            debug!("session cache hit");
            return Ok(session);
        }
        self.start_new_session(key, source, None)
    }

    /// Unconditionally start a new session row for `key`, chaining it to
    /// `parent_session_id` when one is given (reset, compression-split).
    /// A key owns at most one active session — callers must end the
    /// previous one first, or it remains active and this new row is
    /// simply invisible to [`Self::get`] until that happens.
    #[instrument(skip(self), fields(key = %key))]
    pub fn start_new_session(
        &self,
        key: &ConversationKey,
        source: &str,
        parent_session_id: Option<&str>,
    ) -> Result<Session> {
        let id = new_session_id();
        let now = chrono::Utc::now().to_rfc3339();
        let key_str = key.as_str();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions
             (id, session_key, source, parent_session_id, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, key_str, source, parent_session_id, now],
        )?;

        let session = db.query_row(
            "SELECT id, session_key, source, user_id, model, model_config, system_prompt,
                    parent_session_id, started_at, ended_at, end_reason, message_count,
                    tool_call_count, input_tokens, output_tokens, updated_at
             FROM sessions WHERE id = ?1",
            rusqlite::params![id],
            row_to_session,
        )?;
        Ok(session)
    }

    /// Retrieve the *active* session for `key`, if one exists. A key owns at
    /// most one active session at a time (ended sessions stay in the table,
    /// chained via `parent_session_id`, but are not returned here).
    #[instrument(skip(self), fields(key = %key))]
    pub fn get(&self, key: &ConversationKey) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            SELECT_SESSION_COLS_WHERE_KEY,
            rusqlite::params![key.as_str()],
            row_to_session,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Database(e)),
        }
    }

    /// Attach the acting user to a session the first time someone posts in
    /// it. Shared group/channel sessions are created with no user_id; this
    /// records whoever spoke first without overwriting it on later turns.
    #[instrument(skip(self), fields(session_id, user_id))]
    pub fn set_user_if_absent(&self, session_id: &str, user_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET user_id = ?1 WHERE id = ?2 AND user_id IS NULL",
            rusqlite::params![user_id, session_id],
        )?;
        Ok(())
    }

    /// List the most-recently-updated sessions for a user, newest first.
    #[instrument(skip(self), fields(user_id, limit))]
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_key, source, user_id, model, model_config, system_prompt,
                    parent_session_id, started_at, ended_at, end_reason, message_count,
                    tool_call_count, input_tokens, output_tokens, updated_at
             FROM sessions
             WHERE user_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit as i64], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Append a message to a session, syncing the FTS index and bumping the
    /// session's aggregate counters and `updated_at` in one transaction.
    ///
    /// Thin wrapper over [`Self::append_message_full`] for callers with no
    /// finish-reason or reasoning data to persist (user turns, tool results).
    #[instrument(skip(self, content), fields(session_id, role = %role))]
    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tool_call_id: Option<&str>,
        tool_calls: Option<&[ToolCall]>,
        tool_name: Option<&str>,
        token_count: Option<u32>,
    ) -> Result<Message> {
        self.append_message_full(
            session_id,
            role,
            content,
            tool_call_id,
            tool_calls,
            tool_name,
            token_count,
            None,
            None,
            None,
        )
    }

    /// Append a message, additionally persisting the provider-returned
    /// `finish_reason`, opaque `reasoning_details`, and `codex_reasoning_items`
    /// an assistant turn carried — the normal per-turn path through which
    /// agent-loop reasoning data reaches storage without a full
    /// [`Self::rewrite_transcript`].
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, content), fields(session_id, role = %role))]
    pub fn append_message_full(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tool_call_id: Option<&str>,
        tool_calls: Option<&[ToolCall]>,
        tool_name: Option<&str>,
        token_count: Option<u32>,
        finish_reason: Option<&str>,
        reasoning_details: Option<&str>,
        codex_reasoning_items: Option<&[ReasoningItem]>,
    ) -> Result<Message> {
        if role == Role::Tool {
            let tid = tool_call_id.ok_or_else(|| SessionError::DanglingToolCall {
                session_id: session_id.to_string(),
                tool_call_id: String::new(),
            })?;
            self.assert_tool_call_exists(session_id, tid)?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let tool_calls_json = tool_calls
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SessionError::InvalidKey(e.to_string()))?;
        let codex_reasoning_items_json = codex_reasoning_items
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SessionError::InvalidKey(e.to_string()))?;

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        tx.execute(
            "INSERT INTO messages
             (session_id, role, content, tool_call_id, tool_calls_json, tool_name,
              token_count, finish_reason, reasoning_details, codex_reasoning_items,
              created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            rusqlite::params![
                session_id,
                role.to_string(),
                content,
                tool_call_id,
                tool_calls_json,
                tool_name,
                token_count,
                finish_reason,
                reasoning_details,
                codex_reasoning_items_json,
                now
            ],
        )?;
        // mirror defaults to 0 via the column default; rows inserted above
        // are always primary-transcript rows.
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO messages_fts(rowid, content) VALUES (?1, ?2)",
            rusqlite::params![id, content],
        )?;

        let added_tool_calls = tool_calls.map(|t| t.len() as i64).unwrap_or(0);
        tx.execute(
            "UPDATE sessions SET message_count = message_count + 1,
                                  tool_call_count = tool_call_count + ?1,
                                  input_tokens = input_tokens + ?2,
                                  updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![
                added_tool_calls,
                token_count.unwrap_or(0),
                now,
                session_id
            ],
        )?;
        tx.commit()?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            tool_call_id: tool_call_id.map(str::to_string),
            tool_calls: tool_calls.map(|t| t.to_vec()),
            tool_name: tool_name.map(str::to_string),
            token_count,
            finish_reason: finish_reason.map(str::to_string),
            reasoning_details: reasoning_details.map(str::to_string),
            codex_reasoning_items: codex_reasoning_items.map(|t| t.to_vec()),
            mirror: false,
            created_at: now,
        })
    }

    /// Append a mirrored copy of an assistant message to `session_id` — a
    /// sibling-platform session sharing the same user. Unlike
    /// [`Self::append_message`] this never bumps `message_count` or
    /// `tool_call_count`: mirror rows are a parallel transcript, not part of
    /// the conversation they're attached to.
    #[instrument(skip(self, content), fields(session_id))]
    pub fn append_mirror_message(&self, session_id: &str, content: &str) -> Result<Message> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages (session_id, role, content, mirror, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            rusqlite::params![session_id, Role::Assistant.to_string(), content, now],
        )?;
        let id = db.last_insert_rowid();
        db.execute(
            "INSERT INTO messages_fts(rowid, content) VALUES (?1, ?2)",
            rusqlite::params![id, content],
        )?;
        Ok(Message {
            id,
            session_id: session_id.to_string(),
            role: Role::Assistant,
            content: content.to_string(),
            tool_call_id: None,
            tool_calls: None,
            tool_name: None,
            token_count: None,
            finish_reason: None,
            reasoning_details: None,
            codex_reasoning_items: None,
            mirror: true,
            created_at: now,
        })
    }

    /// Find the most-recently-updated active session belonging to `user_id`
    /// on each platform other than `exclude_platform` — the mirror targets
    /// for an assistant message emitted on `exclude_platform`.
    #[instrument(skip(self), fields(user_id, exclude_platform))]
    pub fn find_mirror_targets(&self, user_id: &str, exclude_platform: &str) -> Result<Vec<Session>> {
        let sessions = self.list_for_user(user_id, 50)?;
        let mut seen_platforms = std::collections::HashSet::new();
        let mut targets = Vec::new();
        for session in sessions {
            if !session.is_active() {
                continue;
            }
            let Some((platform, _, _)) = session.key.parse() else {
                continue;
            };
            if platform.eq_ignore_ascii_case(exclude_platform) {
                continue;
            }
            if seen_platforms.insert(platform) {
                targets.push(session);
            }
        }
        Ok(targets)
    }

    fn assert_tool_call_exists(&self, session_id: &str, tool_call_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT tool_calls_json FROM messages
             WHERE session_id = ?1 AND tool_calls_json IS NOT NULL",
        )?;
        let found = stmt
            .query_map(rusqlite::params![session_id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|json| serde_json::from_str::<Vec<ToolCall>>(&json).ok())
            .any(|calls| calls.iter().any(|c| c.id == tool_call_id));
        if found {
            Ok(())
        } else {
            Err(SessionError::DanglingToolCall {
                session_id: session_id.to_string(),
                tool_call_id: tool_call_id.to_string(),
            })
        }
    }

    /// Load the full transcript for a session, messages in insertion order.
    #[instrument(skip(self), fields(session_id))]
    pub fn load_transcript(&self, session_id: &str) -> Result<Transcript> {
        let db = self.db.lock().unwrap();
        let session = db.query_row(
            "SELECT id, session_key, source, user_id, model, model_config, system_prompt,
                    parent_session_id, started_at, ended_at, end_reason, message_count,
                    tool_call_count, input_tokens, output_tokens, updated_at
             FROM sessions WHERE id = ?1",
            rusqlite::params![session_id],
            row_to_session,
        )?;
        let messages = load_messages(&db, session_id)?;
        Ok(Transcript { session, messages })
    }

    /// Atomically replace a session's entire transcript with `messages`.
    ///
    /// Used by undo/retry: delete every stored message, then re-append the
    /// given list in order, keeping the FTS index consistent throughout.
    #[instrument(skip(self, messages), fields(session_id, count = messages.len()))]
    pub fn rewrite_transcript(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let old_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM messages WHERE session_id = ?1")?;
            stmt.query_map(rusqlite::params![session_id], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        for id in old_ids {
            tx.execute(
                "INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', ?1, '')",
                rusqlite::params![id],
            )?;
        }
        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            rusqlite::params![session_id],
        )?;

        for m in messages {
            let tool_calls_json = m
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| SessionError::InvalidKey(e.to_string()))?;
            tx.execute(
                "INSERT INTO messages
                 (session_id, role, content, tool_call_id, tool_calls_json, tool_name,
                  token_count, finish_reason, reasoning_details, codex_reasoning_items,
                  mirror, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                rusqlite::params![
                    session_id,
                    m.role.to_string(),
                    m.content,
                    m.tool_call_id,
                    tool_calls_json,
                    m.tool_name,
                    m.token_count,
                    m.finish_reason,
                    m.reasoning_details,
                    m.codex_reasoning_items
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()
                        .map_err(|e| SessionError::InvalidKey(e.to_string()))?,
                    m.mirror,
                    m.created_at,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO messages_fts(rowid, content) VALUES (?1, ?2)",
                rusqlite::params![id, m.content],
            )?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE sessions SET message_count = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![messages.len() as i64, now, session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Full-text search over message content within one session.
    #[instrument(skip(self), fields(session_id, query))]
    pub fn search_session(&self, session_id: &str, query: &str, limit: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT m.id, m.session_id, m.role, m.content, m.tool_call_id, m.tool_calls_json,
                    m.tool_name, m.token_count, m.finish_reason, m.reasoning_details,
                    m.codex_reasoning_items, m.mirror, m.created_at
             FROM messages m
             JOIN messages_fts f ON m.id = f.rowid
             WHERE m.session_id = ?1 AND messages_fts MATCH ?2
             ORDER BY rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id, query, limit as i64], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Full-text search over every session belonging to `user_id`, most
    /// relevant first. Optionally restricted to one message role. Backs the
    /// `session_search` tool — scoped to the asking user's own sessions, not
    /// the whole transcript store.
    #[instrument(skip(self), fields(user_id, query, role_filter))]
    pub fn search_user_sessions(
        &self,
        user_id: &str,
        query: &str,
        role_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT m.id, m.session_id, m.role, m.content, m.tool_call_id, m.tool_calls_json,
                    m.tool_name, m.token_count, m.finish_reason, m.reasoning_details,
                    m.codex_reasoning_items, m.mirror, m.created_at
             FROM messages m
             JOIN messages_fts f ON m.id = f.rowid
             JOIN sessions s ON s.id = m.session_id
             WHERE s.user_id = ?1 AND messages_fts MATCH ?2 AND m.mirror = 0
             {}
             ORDER BY rank
             LIMIT ?3",
            if role_filter.is_some() { "AND m.role = ?4" } else { "" }
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = if let Some(role) = role_filter {
            stmt.query_map(
                rusqlite::params![user_id, query, limit as i64, role],
                row_to_message,
            )?
            .filter_map(|r| r.ok())
            .collect()
        } else {
            stmt.query_map(rusqlite::params![user_id, query, limit as i64], row_to_message)?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(rows)
    }

    /// End an active session, freezing its counters.
    #[instrument(skip(self), fields(session_id, reason))]
    pub fn end_session(&self, session_id: &str, reason: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE sessions SET ended_at = ?1, end_reason = ?2, updated_at = ?1
             WHERE id = ?3 AND ended_at IS NULL",
            rusqlite::params![now, reason, session_id],
        )?;
        if n == 0 {
            return Err(SessionError::NotFound {
                key: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete sessions (and their messages) that ended before `cutoff`
    /// (RFC3339). Returns the number of sessions removed.
    #[instrument(skip(self), fields(cutoff))]
    pub fn prune_sessions(&self, cutoff: &str) -> Result<usize> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let ids: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM sessions WHERE ended_at IS NOT NULL AND ended_at < ?1")?;
            stmt.query_map(rusqlite::params![cutoff], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        for id in &ids {
            let msg_ids: Vec<i64> = {
                let mut stmt = tx.prepare("SELECT id FROM messages WHERE session_id = ?1")?;
                stmt.query_map(rusqlite::params![id], |r| r.get(0))?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            for mid in msg_ids {
                tx.execute(
                    "INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', ?1, '')",
                    rusqlite::params![mid],
                )?;
            }
            tx.execute("DELETE FROM messages WHERE session_id = ?1", rusqlite::params![id])?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![id])?;
        }
        tx.commit()?;
        Ok(ids.len())
    }

    /// Export one session's transcript as a JSON blob (for backups / support).
    pub fn export_session(&self, session_id: &str) -> Result<String> {
        let transcript = self.load_transcript(session_id)?;
        serde_json::to_string_pretty(&(transcript.session, transcript.messages))
            .map_err(|e| SessionError::InvalidKey(e.to_string()))
    }

    /// Export every session as a JSON array of transcripts.
    pub fn export_all(&self) -> Result<String> {
        let ids: Vec<String> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare("SELECT id FROM sessions ORDER BY started_at")?;
            stmt.query_map([], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.load_transcript(&id)?);
            // load_transcript re-locks the mutex each call; fine at export volume.
        }
        let flat: Vec<(Session, Vec<Message>)> =
            out.into_iter().map(|t| (t.session, t.messages)).collect();
        serde_json::to_string_pretty(&flat).map_err(|e| SessionError::InvalidKey(e.to_string()))
    }
}

const SELECT_SESSION_COLS_WHERE_KEY: &str = "SELECT id, session_key, source, user_id, model, model_config, system_prompt,
        parent_session_id, started_at, ended_at, end_reason, message_count,
        tool_call_count, input_tokens, output_tokens, updated_at
 FROM sessions WHERE session_key = ?1 AND ended_at IS NULL";

fn load_messages(db: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = db.prepare(
        "SELECT id, session_id, role, content, tool_call_id, tool_calls_json, tool_name,
                token_count, finish_reason, reasoning_details, codex_reasoning_items, mirror,
                created_at
         FROM messages WHERE session_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(rusqlite::params![session_id], row_to_message)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let key_str: String = row.get(1)?;
    Ok(Session {
        id: row.get(0)?,
        key: ConversationKey(key_str),
        source: row.get(2)?,
        user_id: row.get(3)?,
        model: row.get(4)?,
        model_config: row.get(5)?,
        system_prompt: row.get(6)?,
        parent_session_id: row.get(7)?,
        started_at: row.get(8)?,
        ended_at: row.get(9)?,
        end_reason: row.get(10)?,
        message_count: row.get::<_, i64>(11)? as u32,
        tool_call_count: row.get::<_, i64>(12)? as u32,
        input_tokens: row.get::<_, i64>(13)? as u64,
        output_tokens: row.get::<_, i64>(14)? as u64,
        updated_at: row.get(15)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    let tool_calls_json: Option<String> = row.get(5)?;
    let reasoning_items_json: Option<String> = row.get(10)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: role_str.parse().unwrap_or(Role::User),
        content: row.get(3)?,
        tool_call_id: row.get(4)?,
        tool_calls: tool_calls_json
            .and_then(|j| serde_json::from_str::<Vec<ToolCall>>(&j).ok()),
        tool_name: row.get(6)?,
        token_count: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
        finish_reason: row.get(8)?,
        reasoning_details: row.get(9)?,
        codex_reasoning_items: reasoning_items_json
            .and_then(|j| serde_json::from_str::<Vec<ReasoningItem>>(&j).ok()),
        mirror: row.get::<_, i64>(11)? != 0,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> SessionManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SessionManager::new(conn)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let m = mgr();
        let key = ConversationKey::new("telegram", "1", None);
        let a = m.get_or_create(&key, "telegram").unwrap();
        let b = m.get_or_create(&key, "telegram").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn append_and_search_message() {
        let m = mgr();
        let key = ConversationKey::new("discord", "2", None);
        let session = m.get_or_create(&key, "discord").unwrap();
        m.append_message(&session.id, Role::User, "the quick brown fox", None, None, None, None)
            .unwrap();
        let found = m.search_session(&session.id, "fox", 10).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn tool_message_requires_matching_call_id() {
        let m = mgr();
        let key = ConversationKey::new("cli", "3", None);
        let session = m.get_or_create(&key, "cli").unwrap();
        let err = m
            .append_message(&session.id, Role::Tool, "result", Some("nope"), None, Some("echo"), None)
            .unwrap_err();
        assert!(matches!(err, SessionError::DanglingToolCall { .. }));
    }

    #[test]
    fn tool_message_succeeds_with_matching_call_id() {
        let m = mgr();
        let key = ConversationKey::new("cli", "4", None);
        let session = m.get_or_create(&key, "cli").unwrap();
        let calls = vec![ToolCall {
            id: "call_1".to_string(),
            name: "echo".to_string(),
            arguments_json: "{}".to_string(),
        }];
        m.append_message(&session.id, Role::Assistant, "", None, Some(&calls), None, None)
            .unwrap();
        m.append_message(&session.id, Role::Tool, "ok", Some("call_1"), None, Some("echo"), None)
            .unwrap();
    }

    #[test]
    fn rewrite_transcript_replaces_all_messages() {
        let m = mgr();
        let key = ConversationKey::new("cli", "5", None);
        let session = m.get_or_create(&key, "cli").unwrap();
        m.append_message(&session.id, Role::User, "first", None, None, None, None)
            .unwrap();
        let replacement = vec![Message {
            id: 0,
            session_id: session.id.clone(),
            role: Role::User,
            content: "replaced".to_string(),
            tool_call_id: None,
            tool_calls: None,
            tool_name: None,
            token_count: None,
            finish_reason: None,
            reasoning_details: None,
            codex_reasoning_items: None,
            mirror: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        }];
        m.rewrite_transcript(&session.id, &replacement).unwrap();
        let transcript = m.load_transcript(&session.id).unwrap();
        assert_eq!(transcript.messages.len(), 1);
        assert_eq!(transcript.messages[0].content, "replaced");
    }

    #[test]
    fn mirror_message_does_not_bump_message_count() {
        let m = mgr();
        let key = ConversationKey::new("discord", "7", None);
        let session = m.get_or_create(&key, "discord").unwrap();
        m.append_mirror_message(&session.id, "hello from telegram").unwrap();
        let reloaded = m.get(&key).unwrap().unwrap();
        assert_eq!(reloaded.message_count, 0);
        let transcript = m.load_transcript(&session.id).unwrap();
        assert!(transcript.messages[0].mirror);
    }

    #[test]
    fn find_mirror_targets_skips_same_platform_and_inactive() {
        let m = mgr();
        let discord_key = ConversationKey::new("discord", "8", None);
        let discord = m.get_or_create(&discord_key, "discord").unwrap();
        m.set_user_if_absent(&discord.id, "user-1").unwrap();

        let telegram_key = ConversationKey::new("telegram", "9", None);
        let telegram = m.get_or_create(&telegram_key, "telegram").unwrap();
        m.set_user_if_absent(&telegram.id, "user-1").unwrap();

        let ended_key = ConversationKey::new("slack", "10", None);
        let ended = m.get_or_create(&ended_key, "slack").unwrap();
        m.set_user_if_absent(&ended.id, "user-1").unwrap();
        m.end_session(&ended.id, "reset").unwrap();

        let targets = m.find_mirror_targets("user-1", "discord").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, telegram.id);
    }

    #[test]
    fn ended_session_is_pruned() {
        let m = mgr();
        let key = ConversationKey::new("cli", "6", None);
        let session = m.get_or_create(&key, "cli").unwrap();
        m.end_session(&session.id, "reset").unwrap();
        let removed = m.prune_sessions("2999-01-01T00:00:00Z").unwrap();
        assert_eq!(removed, 1);
        assert!(m.get(&key).unwrap().is_none());
    }
}
