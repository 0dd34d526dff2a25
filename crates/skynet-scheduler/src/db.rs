use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent), the `output_history` table that
/// records every fire/block event for a job, and an index on `next_run` so
/// the polling query is efficient even with thousands of scheduled jobs.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            name        TEXT    NOT NULL,
            schedule    TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            action      TEXT    NOT NULL,   -- opaque JSON payload
            status      TEXT    NOT NULL DEFAULT 'pending',
            enabled     INTEGER NOT NULL DEFAULT 1,
            last_run    TEXT,               -- ISO-8601 or NULL
            next_run    TEXT,               -- ISO-8601 or NULL
            run_count   INTEGER NOT NULL DEFAULT 0,
            max_runs    INTEGER,            -- NULL means unlimited
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        -- Efficient polling: SELECT … WHERE next_run <= ?  ORDER BY next_run
        CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs (next_run);

        -- Every fire and every blocked-at-creation event for a job, newest last.
        CREATE TABLE IF NOT EXISTS output_history (
            id          TEXT    NOT NULL PRIMARY KEY,
            job_id      TEXT    NOT NULL,
            ran_at      TEXT    NOT NULL,
            blocked     INTEGER NOT NULL DEFAULT 0,
            output      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_output_history_job_id ON output_history (job_id);
        ",
    )?;
    Ok(())
}
