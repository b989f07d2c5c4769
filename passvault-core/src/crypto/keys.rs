//! Vault/item key hierarchy and rotation-aware key resolution.
//!
//! Implements the key unwrapping scheme:
//! User Master Key → unwraps → Vault Key (per rotation) → unwraps → Item Key
//!
//! Wrapped vault keys are fetched from the share key source, verified
//! against the share's Ed25519 signing key, and unwrapped with the user's
//! master key. Resolved keys are cached by `(share_id, rotation)`.

use crate::crypto::cipher::{decrypt, encrypt, EncryptionTag, SymmetricKey};
use crate::crypto::CryptoError;
use crate::remote::client::ApiError;
use crate::remote::ShareKeyData;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A vault's symmetric key at a specific rotation.
///
/// One vault has many keys, one per rotation. Rotation numbers increase
/// monotonically and are never reused; a key is never mutated, only
/// superseded by the next rotation.
#[derive(Debug)]
pub struct VaultKey {
    pub rotation: u64,
    pub key: SymmetricKey,
    pub create_time: i64,
}

/// A share key is a vault key in the share's addressing scheme.
pub type ShareKey = VaultKey;

/// A symmetric key wrapped under a vault key of a specific rotation,
/// used to encrypt a single item's content.
pub struct ItemKey {
    pub rotation: u64,
    pub key: SymmetricKey,
}

/// Supplies wrapped key data for a share. Implemented by the API client;
/// tests provide in-memory fakes.
#[async_trait::async_trait]
pub trait ShareKeySource: Send + Sync {
    async fn share_keys(
        &self,
        user_address: &str,
        share_id: &str,
    ) -> std::result::Result<Vec<ShareKeyData>, ApiError>;
}

/// Resolves vault and item keys for shares the user is a member of.
///
/// Resolved keys are cached in memory keyed by `(share_id, rotation)`.
/// `force_refresh` bypasses the cache and re-fetches, which callers use
/// after a key-rotation event.
pub struct KeyResolver {
    source: Arc<dyn ShareKeySource>,
    master_key: SymmetricKey,
    cache: RwLock<KeyCache>,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<(String, u64), Arc<VaultKey>>,
    latest_rotation: HashMap<String, u64>,
}

impl KeyResolver {
    /// Create a resolver over the given key source and user master key.
    pub fn new(source: Arc<dyn ShareKeySource>, master_key: SymmetricKey) -> Self {
        Self {
            source,
            master_key,
            cache: RwLock::new(KeyCache::default()),
        }
    }

    /// Resolve the current (highest-rotation) vault key for a share.
    pub async fn latest_vault_key(
        &self,
        user_address: &str,
        share_id: &str,
        signing_key: &VerifyingKey,
        force_refresh: bool,
    ) -> crate::Result<Arc<VaultKey>> {
        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(&rotation) = cache.latest_rotation.get(share_id) {
                if let Some(key) = cache.keys.get(&(share_id.to_string(), rotation)) {
                    return Ok(key.clone());
                }
            }
        }

        self.refresh(user_address, share_id, signing_key).await?;

        let cache = self.cache.read().await;
        let rotation = *cache
            .latest_rotation
            .get(share_id)
            .ok_or_else(|| CryptoError::KeyNotAccessible(format!("no keys for share {}", share_id)))?;
        cache
            .keys
            .get(&(share_id.to_string(), rotation))
            .cloned()
            .ok_or_else(|| CryptoError::KeyRotationNotFound { rotation }.into())
    }

    /// Resolve the vault key for a specific rotation.
    ///
    /// A missing key for a referenced rotation is terminal for the single
    /// item that references it; the error is typed so callers can isolate it.
    pub async fn vault_key_by_rotation(
        &self,
        user_address: &str,
        share_id: &str,
        signing_key: &VerifyingKey,
        rotation: u64,
    ) -> crate::Result<Arc<VaultKey>> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.keys.get(&(share_id.to_string(), rotation)) {
                return Ok(key.clone());
            }
        }

        self.refresh(user_address, share_id, signing_key).await?;

        let cache = self.cache.read().await;
        cache
            .keys
            .get(&(share_id.to_string(), rotation))
            .cloned()
            .ok_or_else(|| CryptoError::KeyRotationNotFound { rotation }.into())
    }

    /// Resolve the item key for an encrypted revision.
    ///
    /// If the revision carries its own wrapped key it is unwrapped under the
    /// vault key (tag `ItemKey`); otherwise the vault key is used directly.
    pub fn item_key_for_revision(
        &self,
        vault_key: &VaultKey,
        wrapped_item_key: Option<&[u8]>,
    ) -> crate::Result<ItemKey> {
        resolve_item_key(vault_key, wrapped_item_key)
    }

    /// Resolve the latest vault key and mint a fresh item key wrapped under
    /// it, for encrypting a newly created item.
    ///
    /// Returns `(vault_key, item_key, wrapped_item_key)`.
    pub async fn latest_vault_item_key(
        &self,
        user_address: &str,
        share_id: &str,
        signing_key: &VerifyingKey,
        force_refresh: bool,
    ) -> crate::Result<(Arc<VaultKey>, ItemKey, Vec<u8>)> {
        let vault_key = self
            .latest_vault_key(user_address, share_id, signing_key, force_refresh)
            .await?;

        let item_key = ItemKey {
            rotation: vault_key.rotation,
            key: SymmetricKey::generate(),
        };
        let wrapped = encrypt(
            &vault_key.key,
            item_key.key.as_bytes(),
            EncryptionTag::ItemKey,
        )?;

        Ok((vault_key, item_key, wrapped))
    }

    /// Resolve every cached rotation's vault key for a share, sorted by
    /// rotation ascending. Used when opening a batch of revisions that may
    /// reference several rotations.
    pub async fn all_vault_keys(
        &self,
        user_address: &str,
        share_id: &str,
        signing_key: &VerifyingKey,
        force_refresh: bool,
    ) -> crate::Result<Vec<Arc<VaultKey>>> {
        let needs_fetch = force_refresh || {
            let cache = self.cache.read().await;
            !cache.latest_rotation.contains_key(share_id)
        };
        if needs_fetch {
            self.refresh(user_address, share_id, signing_key).await?;
        }

        let cache = self.cache.read().await;
        let mut keys: Vec<Arc<VaultKey>> = cache
            .keys
            .iter()
            .filter(|((sid, _), _)| sid == share_id)
            .map(|(_, key)| key.clone())
            .collect();
        if keys.is_empty() {
            return Err(
                CryptoError::KeyNotAccessible(format!("no keys for share {}", share_id)).into(),
            );
        }
        keys.sort_by_key(|k| k.rotation);
        Ok(keys)
    }

    /// Fetch, verify and unwrap all keys for a share, repopulating the cache
    /// under the write lock.
    async fn refresh(
        &self,
        user_address: &str,
        share_id: &str,
        signing_key: &VerifyingKey,
    ) -> crate::Result<()> {
        let key_data = self.source.share_keys(user_address, share_id).await?;
        debug!(share_id, count = key_data.len(), "fetched share keys");

        let mut cache = self.cache.write().await;
        for data in &key_data {
            verify_key_signature(share_id, data, signing_key)?;

            let raw = decrypt(&self.master_key, &data.wrapped_key, EncryptionTag::VaultKey)
                .map_err(|_| {
                    CryptoError::KeyNotAccessible(format!(
                        "cannot unwrap key for share {} rotation {}",
                        share_id, data.rotation
                    ))
                })?;
            let key = SymmetricKey::try_from_slice(&raw)?;

            cache.keys.insert(
                (share_id.to_string(), data.rotation),
                Arc::new(VaultKey {
                    rotation: data.rotation,
                    key,
                    create_time: data.create_time,
                }),
            );

            let latest = cache
                .latest_rotation
                .entry(share_id.to_string())
                .or_insert(data.rotation);
            if data.rotation > *latest {
                *latest = data.rotation;
            }
        }
        Ok(())
    }
}

/// Unwrap the item key for a revision, or fall back to the vault key.
pub fn resolve_item_key(
    vault_key: &VaultKey,
    wrapped_item_key: Option<&[u8]>,
) -> crate::Result<ItemKey> {
    match wrapped_item_key {
        Some(wrapped) => {
            let raw = decrypt(&vault_key.key, wrapped, EncryptionTag::ItemKey)?;
            let key = SymmetricKey::try_from_slice(&raw)?;
            Ok(ItemKey {
                rotation: vault_key.rotation,
                key,
            })
        }
        None => Ok(ItemKey {
            rotation: vault_key.rotation,
            key: vault_key.key.clone(),
        }),
    }
}

/// Message covered by a share key signature: `share_id || rotation || wrapped_key`.
pub fn key_signature_message(share_id: &str, rotation: u64, wrapped_key: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(share_id.len() + 8 + wrapped_key.len());
    msg.extend_from_slice(share_id.as_bytes());
    msg.extend_from_slice(&rotation.to_le_bytes());
    msg.extend_from_slice(wrapped_key);
    msg
}

fn verify_key_signature(
    share_id: &str,
    data: &ShareKeyData,
    signing_key: &VerifyingKey,
) -> Result<(), CryptoError> {
    let sig_bytes: [u8; 64] = data
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::KeyNotAccessible("invalid key signature length".to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    let message = key_signature_message(share_id, data.rotation, &data.wrapped_key);
    signing_key
        .verify(&message, &signature)
        .map_err(|_| CryptoError::KeyNotAccessible("key signature verification failed".to_string()))
}
