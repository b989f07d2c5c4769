//! AES-256-GCM encryption context with domain-separated tags.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key
//! - 96-bit (12 byte) nonce, random per encryption
//! - 128-bit authentication tag
//! - An `EncryptionTag` fed to the AEAD as associated data, so ciphertext
//!   produced in one context is never accepted in another
//!
//! The wire format is `nonce(12) || ciphertext || auth_tag(16)`.

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroize;

/// Minimum size of an encrypted blob: nonce(12) + 1 byte + tag(16).
const MIN_BLOB_LEN: usize = 29;

/// Domain-separation label for AEAD contexts.
///
/// Decrypting a blob with a tag other than the one it was encrypted under
/// fails authentication, which prevents e.g. a wrapped item key from being
/// replayed as item content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionTag {
    ItemContent,
    ItemKey,
    VaultContent,
    VaultKey,
}

impl EncryptionTag {
    /// Associated-data bytes for this context.
    pub fn aad(&self) -> &'static [u8] {
        match self {
            Self::ItemContent => b"itemcontent",
            Self::ItemKey => b"itemkey",
            Self::VaultContent => b"vaultcontent",
            Self::VaultKey => b"vaultkey",
        }
    }
}

/// A 256-bit symmetric key used for vault or item encryption.
///
/// Key material only exists in plaintext inside this wrapper and is
/// zeroized on drop. Resolved keys are handed out for the duration of a
/// single encrypt/decrypt call and released on all exit paths.
#[derive(Clone)]
pub struct SymmetricKey {
    key: [u8; 32],
}

impl SymmetricKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    /// Create a key from raw bytes (use with caution)
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Create a key from a variable-length slice, validating the length.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                got: bytes.len(),
            })?;
        Ok(Self { key })
    }

    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encrypt data under the given key and tag.
///
/// Returns `nonce(12) || ciphertext || auth_tag(16)`. Each encryption uses
/// a fresh random nonce. No I/O, no side effects beyond the returned bytes.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8], tag: EncryptionTag) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(CryptoError::EncryptionFailed(
            "Cannot encrypt empty data".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce_bytes: [u8; 12] = nonce.into();

    let ciphertext_with_tag = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: tag.aad(),
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    let mut blob = Vec::with_capacity(12 + ciphertext_with_tag.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext_with_tag);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`] under the same key and tag.
///
/// Fails closed with `AuthenticationFailed` on a wrong key, wrong tag, or
/// any tampering; garbage is never returned silently.
pub fn decrypt(key: &SymmetricKey, blob: &[u8], tag: EncryptionTag) -> Result<Vec<u8>> {
    if blob.len() < MIN_BLOB_LEN {
        return Err(CryptoError::DecryptionFailed(
            "Encrypted blob too short".to_string(),
        ));
    }

    let nonce_bytes: [u8; 12] = blob[..12]
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed("Invalid nonce length".to_string()))?;
    let ciphertext_with_tag = &blob[12..];

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from(nonce_bytes);

    cipher
        .decrypt(
            &nonce,
            Payload {
                msg: ciphertext_with_tag,
                aad: tag.aad(),
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Decrypt a blob to a UTF-8 string.
pub fn decrypt_to_string(key: &SymmetricKey, blob: &[u8], tag: EncryptionTag) -> Result<String> {
    let bytes = decrypt(key, blob, tag)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed("Invalid UTF-8".to_string()))
}
