use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `(status,
/// next_fire)` so the reload polling query stays efficient with thousands
/// of scheduled jobs.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                TEXT    NOT NULL PRIMARY KEY,
            correlation_id    TEXT    NOT NULL,
            trigger_spec      TEXT    NOT NULL,   -- JSON-encoded Trigger enum
            recipient_spec    TEXT    NOT NULL,   -- JSON-encoded Recipient enum
            status            TEXT    NOT NULL DEFAULT 'scheduled',
            priority          INTEGER NOT NULL DEFAULT 0,
            retries           INTEGER NOT NULL DEFAULT 0,
            execution_counter INTEGER NOT NULL DEFAULT 0,
            scheduled_id      TEXT,               -- transient per-instance timer id
            next_fire         TEXT,               -- ISO-8601 or NULL
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL
        ) STRICT;

        -- Reload polling: SELECT … WHERE status IN (…) AND next_fire <= ?
        CREATE INDEX IF NOT EXISTS idx_jobs_status_next_fire ON jobs (status, next_fire);
        ",
    )?;
    Ok(())
}
