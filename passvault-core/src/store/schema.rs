//! Database schema and connection management.

use crate::store::Result;
use rusqlite::{Connection, Transaction};
use std::path::Path;

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Local database connection and schema manager.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self { conn })
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self { conn })
    }

    /// Initialize the database schema
    pub fn initialize_schema(&self) -> Result<()> {
        self.create_shares_table()?;
        self.create_items_table()?;
        self.create_event_cursors_table()?;
        self.create_indexes()?;
        Ok(())
    }

    fn create_shares_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS shares (
                id TEXT PRIMARY KEY,
                vault_id TEXT NOT NULL,
                address_id TEXT NOT NULL,
                signing_key BLOB NOT NULL,
                create_time INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_items_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS items (
                share_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                revision INTEGER NOT NULL,
                content_format_version INTEGER NOT NULL,
                key_rotation INTEGER NOT NULL,
                content BLOB NOT NULL,
                item_key BLOB,
                state INTEGER NOT NULL DEFAULT 1,
                alias_email TEXT,
                create_time INTEGER NOT NULL,
                modify_time INTEGER NOT NULL,
                last_use_time INTEGER,
                revision_time INTEGER NOT NULL,
                PRIMARY KEY (share_id, item_id)
            )",
            [],
        )?;
        Ok(())
    }

    fn create_event_cursors_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS event_cursors (
                user_id TEXT NOT NULL,
                address_id TEXT NOT NULL,
                share_id TEXT NOT NULL,
                last_event_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, address_id, share_id)
            )",
            [],
        )?;
        Ok(())
    }

    fn create_indexes(&self) -> Result<()> {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_items_share_id ON items(share_id)",
            "CREATE INDEX IF NOT EXISTS idx_items_state ON items(state)",
            "CREATE INDEX IF NOT EXISTS idx_shares_vault_id ON shares(vault_id)",
        ];
        for sql in &indexes {
            self.conn.execute(sql, [])?;
        }
        Ok(())
    }

    /// Begin a transaction. All reconciliation writes go through this so a
    /// crash mid-batch cannot leave a share half-updated.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
