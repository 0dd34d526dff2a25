use rusqlite::Connection;

use crate::error::Result;

/// Initialise the sessions, messages and FTS5 tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;

        -- session_key is deliberately NOT unique: a key owns at most one
        -- *active* (ended_at IS NULL) session at a time, but /reset and
        -- compression-splits end one session and start a fresh row under
        -- the same key, chained via parent_session_id.
        CREATE TABLE IF NOT EXISTS sessions (
            id                 TEXT PRIMARY KEY,
            session_key        TEXT NOT NULL,
            source             TEXT NOT NULL,
            user_id            TEXT,
            model              TEXT,
            model_config       TEXT,
            system_prompt      TEXT,
            parent_session_id  TEXT,
            started_at         TEXT NOT NULL,
            ended_at           TEXT,
            end_reason         TEXT,
            message_count      INTEGER NOT NULL DEFAULT 0,
            tool_call_count    INTEGER NOT NULL DEFAULT 0,
            input_tokens       INTEGER NOT NULL DEFAULT 0,
            output_tokens      INTEGER NOT NULL DEFAULT 0,
            updated_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_sessions_parent
            ON sessions(parent_session_id);
        -- Fast path for the one active session a key currently owns.
        CREATE INDEX IF NOT EXISTS idx_sessions_key_active
            ON sessions(session_key) WHERE ended_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_sessions_key
            ON sessions(session_key, started_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id            TEXT NOT NULL,
            role                  TEXT NOT NULL,
            content               TEXT NOT NULL,
            tool_call_id          TEXT,
            tool_calls_json       TEXT,
            tool_name             TEXT,
            token_count           INTEGER,
            finish_reason         TEXT,
            reasoning_details     TEXT,
            codex_reasoning_items TEXT,
            -- Set for messages appended by the mirror mechanism (a copy of an
            -- assistant turn sent to a sibling-platform session). Mirrored
            -- messages never bump the owning session's message_count and are
            -- never replayed back into the pipeline.
            mirror                INTEGER NOT NULL DEFAULT 0,
            created_at            TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, id);

        -- External-content FTS5 index over message bodies; synced manually
        -- on every insert/delete since content='' disables automatic triggers.
        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
            USING fts5(content, content='messages', content_rowid='id');",
    )?;
    Ok(())
}
