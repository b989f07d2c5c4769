//! Decrypted domain items.
//!
//! An [`Item`] is only ever constructed by [`OpenItem`] from an encrypted
//! revision; it never comes from untrusted input without passing through
//! decryption. Per-field secrets (login password) are kept sealed and
//! decrypted only on explicit access.

pub mod open;
pub mod request;
pub mod update;

pub use open::OpenItem;
pub use update::UpdateItem;

use crate::crypto::cipher::{decrypt_to_string, encrypt, EncryptionTag, SymmetricKey};
use crate::remote::ItemState;

/// A secret field held as ciphertext, decrypted only on explicit access.
///
/// Sealed under the item key with tag `ItemContent`, so plaintext secrets
/// are not kept in memory for the lifetime of the item.
#[derive(Debug, Clone)]
pub struct SecretString {
    cipher: Vec<u8>,
}

impl SecretString {
    /// Seal a plaintext secret under the given key.
    pub fn seal(key: &SymmetricKey, plaintext: &str) -> crate::Result<Self> {
        if plaintext.is_empty() {
            return Ok(Self { cipher: Vec::new() });
        }
        Ok(Self {
            cipher: encrypt(key, plaintext.as_bytes(), EncryptionTag::ItemContent)?,
        })
    }

    /// Decrypt the secret. Requires the item key it was sealed under.
    pub fn reveal(&self, key: &SymmetricKey) -> crate::Result<String> {
        if self.cipher.is_empty() {
            return Ok(String::new());
        }
        Ok(decrypt_to_string(key, &self.cipher, EncryptionTag::ItemContent)?)
    }
}

/// Typed item payload, one variant per item kind.
#[derive(Debug, Clone)]
pub enum ItemType {
    Login {
        username: String,
        password: SecretString,
        urls: Vec<String>,
    },
    Note,
    Alias {
        alias_email: String,
    },
    Password {
        password: SecretString,
    },
}

/// A decrypted item.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub share_id: String,
    pub revision: u64,
    pub state: ItemState,
    pub item_type: ItemType,
    pub title: String,
    pub note: String,
    pub create_time: i64,
    pub modify_time: i64,
    pub last_autofill_time: Option<i64>,
}

impl Item {
    /// Login username, if this is a login item.
    pub fn username(&self) -> Option<&str> {
        match &self.item_type {
            ItemType::Login { username, .. } => Some(username),
            _ => None,
        }
    }

    /// Alias email, if this is an alias item.
    pub fn alias_email(&self) -> Option<&str> {
        match &self.item_type {
            ItemType::Alias { alias_email } => Some(alias_email),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_seal_reveal() {
        let key = SymmetricKey::generate();
        let secret = SecretString::seal(&key, "hunter2").unwrap();
        assert_eq!(secret.reveal(&key).unwrap(), "hunter2");
    }

    #[test]
    fn secret_string_wrong_key_fails() {
        let key = SymmetricKey::generate();
        let other = SymmetricKey::generate();
        let secret = SecretString::seal(&key, "hunter2").unwrap();
        assert!(secret.reveal(&other).is_err());
    }

    #[test]
    fn empty_secret_roundtrips() {
        let key = SymmetricKey::generate();
        let secret = SecretString::seal(&key, "").unwrap();
        assert_eq!(secret.reveal(&key).unwrap(), "");
    }
}
