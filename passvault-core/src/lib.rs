//! Passvault Core Library
//!
//! This library implements the encrypted item synchronization and local
//! persistence core: key hierarchy resolution, authenticated encryption,
//! the binary item codec, remote event reconciliation, and the sync
//! orchestrator that drives it all.

pub mod codec;
pub mod crypto;
pub mod item;
pub mod remote;
pub mod store;
pub mod sync;

pub use crypto::cipher::{decrypt, encrypt, EncryptionTag, SymmetricKey};
pub use crypto::keys::{ItemKey, KeyResolver, ShareKey, VaultKey};
pub use crypto::CryptoError;
pub use item::{Item, ItemType, OpenItem, UpdateItem};
pub use remote::client::{ApiClient, ApiError};
pub use store::{Database, StoreError};
pub use sync::{ApplyOutcome, EventReconciler, SyncConfig, SyncMode, SyncOrchestrator, SyncState};

use thiserror::Error;

/// Result type for passvault operations
pub type Result<T> = std::result::Result<T, PassvaultError>;

/// General error type for passvault operations
#[derive(Error, Debug)]
pub enum PassvaultError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("API error: {0}")]
    Api(#[from] remote::client::ApiError),

    #[error("Codec error: {0}")]
    Codec(#[from] prost::DecodeError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
