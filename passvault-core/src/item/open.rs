//! Turning an encrypted wire revision into a decrypted domain item.

use crate::codec::{self, ItemExt};
use crate::crypto::cipher::{decrypt, EncryptionTag};
use crate::crypto::keys::{resolve_item_key, ItemKey, ShareKey};
use crate::crypto::CryptoError;
use crate::item::{Item, ItemType, SecretString};
use crate::remote::{EncryptedItemRevision, Share};
use std::sync::Arc;

/// Opens encrypted item revisions against a supplied set of share keys.
pub struct OpenItem;

impl OpenItem {
    /// Decrypt a wire revision into a domain [`Item`].
    ///
    /// Selects the share key matching the revision's `key_rotation`
    /// (`KeyRotationNotFound` if absent from the supplied set), unwraps the
    /// per-item key if present, decrypts and parses the content, and builds
    /// the item preserving revision, id and timestamps verbatim. The login
    /// password is re-sealed under the item key rather than held in
    /// plaintext.
    pub fn open(
        revision: &EncryptedItemRevision,
        share: &Share,
        share_keys: &[Arc<ShareKey>],
    ) -> crate::Result<Item> {
        let vault_key = share_keys
            .iter()
            .find(|k| k.rotation == revision.key_rotation)
            .ok_or(CryptoError::KeyRotationNotFound {
                rotation: revision.key_rotation,
            })?;

        let item_key = resolve_item_key(vault_key, revision.key.as_deref())?;

        let plaintext = decrypt(&item_key.key, &revision.content, EncryptionTag::ItemContent)?;
        let contents = codec::parse(&plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("content parse: {}", e)))?;

        let item_type = Self::item_type(&contents, revision, &item_key)?;

        Ok(Item {
            id: revision.item_id.clone(),
            share_id: share.id.clone(),
            revision: revision.revision,
            state: revision.state,
            item_type,
            title: contents.name().to_string(),
            note: contents.note_text().to_string(),
            create_time: revision.create_time,
            modify_time: revision.modify_time,
            last_autofill_time: revision.last_use_time,
        })
    }

    fn item_type(
        contents: &codec::ItemContents,
        revision: &EncryptedItemRevision,
        item_key: &ItemKey,
    ) -> crate::Result<ItemType> {
        Ok(match &contents.ext {
            Some(ItemExt::Login(login)) => ItemType::Login {
                username: login.username.clone(),
                password: SecretString::seal(&item_key.key, &login.password)?,
                urls: login.urls.clone(),
            },
            Some(ItemExt::Alias(alias)) => ItemType::Alias {
                // The server-side alias address is authoritative when set.
                alias_email: revision
                    .alias_email
                    .clone()
                    .unwrap_or_else(|| alias.alias_email.clone()),
            },
            Some(ItemExt::Password(pw)) => ItemType::Password {
                password: SecretString::seal(&item_key.key, &pw.password)?,
            },
            Some(ItemExt::Note(_)) | None => ItemType::Note,
        })
    }
}
