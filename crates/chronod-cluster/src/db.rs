use rusqlite::Connection;

use crate::error::Result;

/// Initialise the leadership schema and seed the singleton heartbeat row.
///
/// The row is created exactly once on the first boot of any instance and is
/// never deleted while the cluster lives; `INSERT OR IGNORE` keeps this safe
/// to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cluster_leader (
            id              INTEGER NOT NULL PRIMARY KEY CHECK (id = 0),
            holder          TEXT,               -- instance id, NULL when unclaimed
            term            INTEGER NOT NULL DEFAULT 0,
            last_heartbeat  TEXT    NOT NULL    -- ISO-8601
        ) STRICT;

        INSERT OR IGNORE INTO cluster_leader (id, holder, term, last_heartbeat)
        VALUES (0, NULL, 0, '1970-01-01T00:00:00+00:00');
        ",
    )?;
    Ok(())
}
