//! Cryptographic primitives for the sync core.
//!
//! This module provides:
//! - AES-256-GCM encryption/decryption with domain-separation tags
//! - The vault/item key hierarchy and rotation-aware key resolution
//! - Zeroization of key material

pub mod cipher;
pub mod keys;

pub use cipher::{decrypt, encrypt, EncryptionTag, SymmetricKey};
pub use keys::{ItemKey, KeyResolver, ShareKey, ShareKeySource, VaultKey};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("No key material for rotation {rotation}")]
    KeyRotationNotFound { rotation: u64 },

    #[error("Key not accessible: {0}")]
    KeyNotAccessible(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
