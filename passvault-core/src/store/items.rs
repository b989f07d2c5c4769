//! Encrypted item row operations.
//!
//! Rows keep the wire ciphertext verbatim (content plus wrapped item key),
//! so local reads go through the same `item::open` path as remote data.
//! Upserts never regress a revision.

use crate::remote::{EncryptedItemRevision, ItemState};
use crate::store::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// One locally persisted encrypted item revision.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub share_id: String,
    pub item_id: String,
    pub revision: u64,
    pub content_format_version: u32,
    pub key_rotation: u64,
    pub content: Vec<u8>,
    pub item_key: Option<Vec<u8>>,
    pub state: ItemState,
    pub alias_email: Option<String>,
    pub create_time: i64,
    pub modify_time: i64,
    pub last_use_time: Option<i64>,
    pub revision_time: i64,
}

impl ItemRecord {
    /// Build a record from a wire revision.
    pub fn from_revision(share_id: &str, revision: &EncryptedItemRevision) -> Self {
        Self {
            share_id: share_id.to_string(),
            item_id: revision.item_id.clone(),
            revision: revision.revision,
            content_format_version: revision.content_format_version,
            key_rotation: revision.key_rotation,
            content: revision.content.clone(),
            item_key: revision.key.clone(),
            state: revision.state,
            alias_email: revision.alias_email.clone(),
            create_time: revision.create_time,
            modify_time: revision.modify_time,
            last_use_time: revision.last_use_time,
            revision_time: revision.revision_time,
        }
    }

    /// Convert back to the wire shape, e.g. to re-open a stored item.
    pub fn into_revision(self) -> EncryptedItemRevision {
        EncryptedItemRevision {
            item_id: self.item_id,
            revision: self.revision,
            content_format_version: self.content_format_version,
            key_rotation: self.key_rotation,
            content: self.content,
            key: self.item_key,
            state: self.state,
            alias_email: self.alias_email,
            create_time: self.create_time,
            modify_time: self.modify_time,
            last_use_time: self.last_use_time,
            revision_time: self.revision_time,
        }
    }
}

/// Upsert an item row, guarded against revision regression.
///
/// Returns `true` if the row was inserted or updated, `false` if an equal
/// or newer revision was already present (replay or out-of-order delivery).
pub fn upsert_item(conn: &Connection, record: &ItemRecord) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO items (
            share_id, item_id, revision, content_format_version, key_rotation,
            content, item_key, state, alias_email,
            create_time, modify_time, last_use_time, revision_time
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(share_id, item_id) DO UPDATE SET
            revision = excluded.revision,
            content_format_version = excluded.content_format_version,
            key_rotation = excluded.key_rotation,
            content = excluded.content,
            item_key = excluded.item_key,
            state = excluded.state,
            alias_email = excluded.alias_email,
            create_time = excluded.create_time,
            modify_time = excluded.modify_time,
            last_use_time = excluded.last_use_time,
            revision_time = excluded.revision_time
        WHERE excluded.revision > items.revision",
        params![
            record.share_id,
            record.item_id,
            record.revision as i64,
            record.content_format_version as i64,
            record.key_rotation as i64,
            record.content,
            record.item_key,
            record.state.as_i64(),
            record.alias_email,
            record.create_time,
            record.modify_time,
            record.last_use_time,
            record.revision_time,
        ],
    )?;
    Ok(changed > 0)
}

/// Delete an item row. Absence is not an error (idempotent).
pub fn delete_item(conn: &Connection, share_id: &str, item_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM items WHERE share_id = ?1 AND item_id = ?2",
        params![share_id, item_id],
    )?;
    Ok(changed > 0)
}

/// Fetch one item row, if present.
pub fn get_item(conn: &Connection, share_id: &str, item_id: &str) -> Result<Option<ItemRecord>> {
    conn.query_row(
        "SELECT share_id, item_id, revision, content_format_version, key_rotation,
                content, item_key, state, alias_email,
                create_time, modify_time, last_use_time, revision_time
         FROM items WHERE share_id = ?1 AND item_id = ?2",
        params![share_id, item_id],
        row_to_record,
    )
    .optional()
    .map_err(Into::into)
}

/// Stored revision for an item, if any. Cheap guard used by the reconciler.
pub fn item_revision(conn: &Connection, share_id: &str, item_id: &str) -> Result<Option<u64>> {
    conn.query_row(
        "SELECT revision FROM items WHERE share_id = ?1 AND item_id = ?2",
        params![share_id, item_id],
        |row| row.get::<_, i64>(0).map(|r| r as u64),
    )
    .optional()
    .map_err(Into::into)
}

/// List all item rows for a share, ordered by item id.
pub fn list_items(conn: &Connection, share_id: &str) -> Result<Vec<ItemRecord>> {
    let mut stmt = conn.prepare(
        "SELECT share_id, item_id, revision, content_format_version, key_rotation,
                content, item_key, state, alias_email,
                create_time, modify_time, last_use_time, revision_time
         FROM items WHERE share_id = ?1 ORDER BY item_id",
    )?;
    let rows = stmt.query_map(params![share_id], row_to_record)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRecord> {
    Ok(ItemRecord {
        share_id: row.get(0)?,
        item_id: row.get(1)?,
        revision: row.get::<_, i64>(2)? as u64,
        content_format_version: row.get::<_, i64>(3)? as u32,
        key_rotation: row.get::<_, i64>(4)? as u64,
        content: row.get(5)?,
        item_key: row.get(6)?,
        state: ItemState::from_i64(row.get(7)?),
        alias_email: row.get(8)?,
        create_time: row.get(9)?,
        modify_time: row.get(10)?,
        last_use_time: row.get(11)?,
        revision_time: row.get(12)?,
    })
}
