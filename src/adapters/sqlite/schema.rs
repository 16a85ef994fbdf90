use rusqlite::Connection;

use crate::types::error::SyncError;

pub fn initialize_schema(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        "
        -- Cache of remote message state, one row per (account, folder, id)
        CREATE TABLE IF NOT EXISTS messages (
            account_id  TEXT NOT NULL,
            folder      TEXT NOT NULL,
            seq_id      INTEGER NOT NULL,   -- remote-assigned, 0 = not yet appended
            is_read     INTEGER NOT NULL DEFAULT 0,
            is_flagged  INTEGER NOT NULL DEFAULT 0,
            subject     TEXT,
            sender      TEXT,
            date        INTEGER,            -- unix epoch ms
            fetched_at  INTEGER NOT NULL,   -- unix epoch ms
            PRIMARY KEY (account_id, folder, seq_id)
        ) WITHOUT ROWID;
        ",
    )?;
    Ok(())
}
