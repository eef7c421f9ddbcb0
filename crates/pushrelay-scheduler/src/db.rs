use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `schedule_entries` table (idempotent). Schedule and job state
/// are opaque JSON documents keyed by their registry type tag.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedule_entries (
            id             INTEGER NOT NULL PRIMARY KEY,
            schedule_type  TEXT    NOT NULL,
            schedule       TEXT    NOT NULL,   -- JSON record
            job_type       TEXT    NOT NULL,
            job            TEXT    NOT NULL,   -- JSON record
            next_run       TEXT,               -- RFC 3339 or NULL
            prev_run       TEXT,               -- RFC 3339 or NULL
            updated_at     TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
