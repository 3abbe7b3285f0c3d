use rusqlite::Connection;

use crate::types::error::InboxError;

pub fn initialize_schema(conn: &Connection) -> Result<(), InboxError> {
    conn.execute_batch(
        "
        -- The draft being edited in each composer session.
        -- Saved remote drafts are not mirrored here; only unsent edits are.
        CREATE TABLE IF NOT EXISTS composer_drafts (
            session_key     TEXT PRIMARY KEY,
            remote_id       TEXT,               -- saved draft id, once the remote has one
            payload         TEXT NOT NULL,      -- JSON DraftData
            dirty           INTEGER NOT NULL DEFAULT 1,  -- edits not yet saved remotely
            updated_at      INTEGER NOT NULL    -- unix epoch ms
        );
        ",
    )?;
    Ok(())
}
