//! Local persistence for the sync core.
//!
//! Encrypted item revisions, share records and per-share event cursors are
//! stored in SQLite. Plaintext never reaches disk: item rows hold the same
//! ciphertext the wire carries, validated by decryption at apply time.

pub mod cursors;
pub mod items;
pub mod schema;
pub mod shares;

pub use items::ItemRecord;
pub use schema::Database;

use thiserror::Error;

/// Errors from the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
