//! Building wire-format mutation requests from decrypted contents.

use crate::codec::{self, ItemContents, CONTENT_FORMAT_VERSION};
use crate::crypto::cipher::{encrypt, EncryptionTag};
use crate::crypto::keys::ItemKey;
use crate::remote::{CreateItemRequest, UpdateItemRequest};

/// Build a create-item request body.
///
/// The contents are serialized, encrypted under the item key (tag
/// `ItemContent`), and the wrapped item key travels alongside so the server
/// never sees key material in the clear.
pub fn create_request(
    item_key: &ItemKey,
    wrapped_item_key: &[u8],
    contents: &ItemContents,
) -> crate::Result<CreateItemRequest> {
    let content = encrypt(
        &item_key.key,
        &codec::serialize(contents),
        EncryptionTag::ItemContent,
    )?;
    Ok(CreateItemRequest {
        key_rotation: item_key.rotation,
        content_format_version: CONTENT_FORMAT_VERSION,
        content,
        key: Some(wrapped_item_key.to_vec()),
    })
}

/// Build an update-item request body.
///
/// `last_revision` is the revision the client believes is current; the
/// server rejects the update with a revision conflict if it is stale.
pub fn update_request(
    item_key: &ItemKey,
    contents: &ItemContents,
    last_revision: u64,
) -> crate::Result<UpdateItemRequest> {
    let content = encrypt(
        &item_key.key,
        &codec::serialize(contents),
        EncryptionTag::ItemContent,
    )?;
    Ok(UpdateItemRequest {
        key_rotation: item_key.rotation,
        last_revision,
        content_format_version: CONTENT_FORMAT_VERSION,
        content,
    })
}
