use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::DbPool;
use crate::types::error::SyncError;
use crate::types::{FolderKey, Message, SequenceId};

const COLUMNS: &str = "seq_id, is_read, is_flagged, subject, sender, date";

fn from_row(folder: &FolderKey, row: &Row<'_>) -> rusqlite::Result<Message> {
    let date: Option<i64> = row.get(5)?;
    Ok(Message {
        folder: folder.clone(),
        id: SequenceId(row.get(0)?),
        is_read: row.get(1)?,
        is_flagged: row.get(2)?,
        subject: row.get(3)?,
        from: row.get(4)?,
        date: date.and_then(DateTime::<Utc>::from_timestamp_millis),
    })
}

fn query_one(
    pool: &DbPool,
    folder: &FolderKey,
    order: &str,
) -> Result<Option<Message>, SyncError> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM messages
         WHERE account_id = ?1 AND folder = ?2 AND seq_id > 0
         ORDER BY seq_id {} LIMIT 1",
        COLUMNS, order
    );
    let result = conn.query_row(&sql, params![folder.account_id, folder.folder], |row| {
        from_row(folder, row)
    });

    match result {
        Ok(message) => Ok(Some(message)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(SyncError::Database(e.to_string())),
    }
}

pub fn get_latest(pool: &DbPool, folder: &FolderKey) -> Result<Option<Message>, SyncError> {
    query_one(pool, folder, "DESC")
}

pub fn get_earliest(pool: &DbPool, folder: &FolderKey) -> Result<Option<Message>, SyncError> {
    query_one(pool, folder, "ASC")
}

pub fn get_in_range(
    pool: &DbPool,
    folder: &FolderKey,
    min: SequenceId,
    max_exclusive: SequenceId,
) -> Result<Vec<Message>, SyncError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages
         WHERE account_id = ?1 AND folder = ?2 AND seq_id >= ?3 AND seq_id < ?4
         ORDER BY seq_id DESC",
        COLUMNS
    ))?;

    let rows = stmt.query_map(
        params![folder.account_id, folder.folder, min.0, max_exclusive.0],
        |row| from_row(folder, row),
    )?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| SyncError::Database(e.to_string()))
}

pub fn upsert_messages(pool: &DbPool, messages: &[Message]) -> Result<usize, SyncError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().timestamp_millis();

    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO messages (
                account_id, folder, seq_id, is_read, is_flagged,
                subject, sender, date, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for msg in messages {
            stmt.execute(params![
                msg.folder.account_id,
                msg.folder.folder,
                msg.id.0,
                msg.is_read,
                msg.is_flagged,
                msg.subject,
                msg.from,
                msg.date.map(|d| d.timestamp_millis()),
                now,
            ])?;
        }
    }

    tx.commit()?;
    Ok(messages.len())
}

pub fn update_flags_batch(pool: &DbPool, messages: &[Message]) -> Result<usize, SyncError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let mut updated = 0;

    {
        let mut stmt = tx.prepare(
            "UPDATE messages SET is_read = ?1, is_flagged = ?2
             WHERE account_id = ?3 AND folder = ?4 AND seq_id = ?5",
        )?;
        for msg in messages {
            updated += stmt.execute(params![
                msg.is_read,
                msg.is_flagged,
                msg.folder.account_id,
                msg.folder.folder,
                msg.id.0,
            ])?;
        }
    }

    tx.commit()?;
    Ok(updated)
}

pub fn delete_messages(pool: &DbPool, messages: &[Message]) -> Result<usize, SyncError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let mut deleted = 0;

    {
        let mut stmt = tx.prepare(
            "DELETE FROM messages WHERE account_id = ?1 AND folder = ?2 AND seq_id = ?3",
        )?;
        for msg in messages {
            deleted += stmt.execute(params![msg.folder.account_id, msg.folder.folder, msg.id.0])?;
        }
    }

    tx.commit()?;
    Ok(deleted)
}
