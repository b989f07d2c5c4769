//! Share row operations.

use crate::remote::Share;
use crate::store::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Upsert a share record.
pub fn upsert_share(conn: &Connection, share: &Share) -> Result<()> {
    conn.execute(
        "INSERT INTO shares (id, vault_id, address_id, signing_key, create_time)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            vault_id = excluded.vault_id,
            address_id = excluded.address_id,
            signing_key = excluded.signing_key,
            create_time = excluded.create_time",
        params![
            share.id,
            share.vault_id,
            share.address_id,
            share.signing_key,
            share.create_time
        ],
    )?;
    Ok(())
}

/// Fetch one share by id.
pub fn get_share(conn: &Connection, share_id: &str) -> Result<Option<Share>> {
    conn.query_row(
        "SELECT id, vault_id, address_id, signing_key, create_time FROM shares WHERE id = ?1",
        params![share_id],
        row_to_share,
    )
    .optional()
    .map_err(Into::into)
}

/// List all known shares, ordered by id.
pub fn list_shares(conn: &Connection) -> Result<Vec<Share>> {
    let mut stmt = conn
        .prepare("SELECT id, vault_id, address_id, signing_key, create_time FROM shares ORDER BY id")?;
    let rows = stmt.query_map([], row_to_share)?;
    let mut shares = Vec::new();
    for row in rows {
        shares.push(row?);
    }
    Ok(shares)
}

/// Remove a share and all of its items.
pub fn delete_share(conn: &Connection, share_id: &str) -> Result<()> {
    conn.execute("DELETE FROM items WHERE share_id = ?1", params![share_id])?;
    conn.execute("DELETE FROM shares WHERE id = ?1", params![share_id])?;
    Ok(())
}

fn row_to_share(row: &rusqlite::Row<'_>) -> rusqlite::Result<Share> {
    Ok(Share {
        id: row.get(0)?,
        vault_id: row.get(1)?,
        address_id: row.get(2)?,
        signing_key: row.get(3)?,
        create_time: row.get(4)?,
    })
}
