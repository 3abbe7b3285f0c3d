use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::DbPool;
use crate::types::error::InboxError;
use crate::types::{DraftData, DraftId};

/// A composer draft as persisted locally
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDraft {
    pub session_key: String,
    pub remote_id: Option<DraftId>,
    pub data: DraftData,
    /// Local edits the remote has not seen yet
    pub dirty: bool,
    pub updated_at: DateTime<Utc>,
}

pub fn save_local_draft(pool: &DbPool, draft: &LocalDraft) -> Result<(), InboxError> {
    let conn = pool.get()?;
    let payload = serde_json::to_string(&draft.data)?;
    conn.execute(
        "INSERT INTO composer_drafts (session_key, remote_id, payload, dirty, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(session_key) DO UPDATE SET
            remote_id = excluded.remote_id,
            payload = excluded.payload,
            dirty = excluded.dirty,
            updated_at = excluded.updated_at",
        params![
            draft.session_key,
            draft.remote_id,
            payload,
            draft.dirty as i32,
            draft.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

pub fn load_local_draft(pool: &DbPool, session_key: &str) -> Result<Option<LocalDraft>, InboxError> {
    let conn = pool.get()?;
    let row = conn
        .query_row(
            "SELECT session_key, remote_id, payload, dirty, updated_at
             FROM composer_drafts WHERE session_key = ?1",
            params![session_key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? != 0,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((session_key, remote_id, payload, dirty, updated_at)) = row else {
        return Ok(None);
    };
    Ok(Some(LocalDraft {
        session_key,
        remote_id,
        data: serde_json::from_str(&payload)?,
        dirty,
        updated_at: DateTime::<Utc>::from_timestamp_millis(updated_at).unwrap_or_else(Utc::now),
    }))
}

pub fn delete_local_draft(pool: &DbPool, session_key: &str) -> Result<(), InboxError> {
    let conn = pool.get()?;
    conn.execute(
        "DELETE FROM composer_drafts WHERE session_key = ?1",
        params![session_key],
    )?;
    Ok(())
}
