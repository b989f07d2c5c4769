//! Wire format models for the sync API.
//!
//! JSON records with base64-encoded ciphertext fields. Nothing in this
//! module touches key material; decryption happens in `item::open`.

pub mod client;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an item revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Active,
    Trashed,
}

impl ItemState {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Active => 1,
            Self::Trashed => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            2 => Self::Trashed,
            _ => Self::Active,
        }
    }
}

/// One encrypted item revision as served by the API.
///
/// `revision` strictly increases per item on every successful update; a
/// stale `last_revision` in an update request is rejected by the server
/// with a revision conflict, never silently overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedItemRevision {
    pub item_id: String,
    pub revision: u64,
    pub content_format_version: u32,
    pub key_rotation: u64,
    /// Item content, AEAD-encrypted under the item key (tag `ItemContent`).
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Item key wrapped under the vault key (tag `ItemKey`), if the item
    /// has its own key; otherwise the vault key encrypts the content.
    #[serde(default, with = "base64_bytes_opt")]
    pub key: Option<Vec<u8>>,
    pub state: ItemState,
    pub alias_email: Option<String>,
    pub create_time: i64,
    pub modify_time: i64,
    pub last_use_time: Option<i64>,
    pub revision_time: i64,
}

/// Revision payload carried inside a pending event list.
pub type PendingEventItemRevision = EncryptedItemRevision;

/// Server-issued delta for one share since a client's last-seen cursor.
///
/// Keyed by `last_event_id`; consumed exactly once, after which the cursor
/// advances. Reprocessing the same cursor is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEventList {
    pub last_event_id: String,
    #[serde(default)]
    pub updated_items: Vec<PendingEventItemRevision>,
    #[serde(default)]
    pub deleted_item_ids: Vec<String>,
    /// More events exist beyond this batch; the caller should fetch again.
    #[serde(default)]
    pub events_pending: bool,
    /// The share structure (membership, key rotation) changed; keys must be
    /// re-fetched before this batch is decrypted.
    #[serde(default)]
    pub update_share_event: bool,
}

/// Aggregates pending event lists plus a share-structure-change flag.
#[derive(Debug, Clone, Default)]
pub struct ItemPendingEvent {
    pub events: Vec<PendingEventList>,
    pub update_share_event: bool,
}

impl ItemPendingEvent {
    /// Aggregate event lists, deriving the share-structure flag.
    pub fn from_lists(events: Vec<PendingEventList>) -> Self {
        let update_share_event = events.iter().any(|e| e.update_share_event);
        Self {
            events,
            update_share_event,
        }
    }

    pub fn has_pending_item_revisions(&self) -> bool {
        self.events.iter().any(|e| !e.updated_items.is_empty())
    }

    pub fn has_deleted_item_ids(&self) -> bool {
        self.events.iter().any(|e| !e.deleted_item_ids.is_empty())
    }

    pub fn has_pending_changes(&self) -> bool {
        self.has_pending_item_revisions() || self.has_deleted_item_ids() || self.update_share_event
    }
}

/// Wrapped vault key material for one rotation of a share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareKeyData {
    pub rotation: u64,
    /// Vault key wrapped under the user master key (tag `VaultKey`).
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
    /// Ed25519 signature over `share_id || rotation || wrapped_key`.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub create_time: i64,
}

/// An addressable grant of access to a vault for a user address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    pub id: String,
    pub vault_id: String,
    pub address_id: String,
    /// Ed25519 public key that signs this share's wrapped vault keys.
    #[serde(with = "base64_bytes")]
    pub signing_key: Vec<u8>,
    pub create_time: i64,
}

/// Request body for creating a new item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItemRequest {
    pub key_rotation: u64,
    pub content_format_version: u32,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    #[serde(default, with = "base64_bytes_opt")]
    pub key: Option<Vec<u8>>,
}

/// Request body for updating an existing item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    pub key_rotation: u64,
    /// The revision the client believes is current. The server rejects the
    /// update if this is stale.
    pub last_revision: u64,
    pub content_format_version: u32,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// Request body for trash/untrash/delete, which all address items by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemIdsRequest {
    pub item_ids: Vec<String>,
}

/// One page of item revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsPage {
    pub revisions: Vec<EncryptedItemRevision>,
    /// Token for the next page, absent on the last page.
    pub next_token: Option<String>,
}

/// Custom base64 serialization for `Vec<u8>`.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Custom base64 serialization for `Option<Vec<u8>>`.
pub(crate) mod base64_bytes_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => STANDARD
                .decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
