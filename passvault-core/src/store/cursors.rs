//! Per-share event cursor persistence.
//!
//! Cursors are keyed by `(user_id, address_id, share_id)` with
//! last-event-wins upsert semantics. The reconciler treats a batch whose
//! `last_event_id` equals the stored cursor as already applied.

use crate::store::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Read the stored cursor for a share, if any.
pub fn get_cursor(
    conn: &Connection,
    user_id: &str,
    address_id: &str,
    share_id: &str,
) -> Result<Option<String>> {
    conn.query_row(
        "SELECT last_event_id FROM event_cursors
         WHERE user_id = ?1 AND address_id = ?2 AND share_id = ?3",
        params![user_id, address_id, share_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

/// Advance the stored cursor (upsert, last event wins).
pub fn set_cursor(
    conn: &Connection,
    user_id: &str,
    address_id: &str,
    share_id: &str,
    last_event_id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO event_cursors (user_id, address_id, share_id, last_event_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id, address_id, share_id) DO UPDATE SET
            last_event_id = excluded.last_event_id,
            updated_at = excluded.updated_at",
        params![
            user_id,
            address_id,
            share_id,
            last_event_id,
            chrono::Utc::now().timestamp()
        ],
    )?;
    Ok(())
}
