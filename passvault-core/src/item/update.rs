//! Item mutation with conflict-aware retry.

use crate::codec::ItemContents;
use crate::crypto::keys::ItemKey;
use crate::item::request::update_request;
use crate::remote::client::{ApiClient, ApiError};
use crate::remote::EncryptedItemRevision;
use std::sync::Arc;
use tracing::warn;

/// Updates an item, retrying exactly once on a revision conflict.
///
/// On the first conflict the latest revision is re-fetched and the mutation
/// replayed against it. A second conflict surfaces to the caller as "item
/// changed elsewhere".
pub struct UpdateItem {
    api: Arc<dyn ApiClient>,
}

impl UpdateItem {
    pub fn new(api: Arc<dyn ApiClient>) -> Self {
        Self { api }
    }

    pub async fn update(
        &self,
        share_id: &str,
        item_id: &str,
        item_key: &ItemKey,
        contents: &ItemContents,
        last_revision: u64,
    ) -> crate::Result<EncryptedItemRevision> {
        let body = update_request(item_key, contents, last_revision)?;

        match self.api.update_item(share_id, item_id, &body).await {
            Ok(revision) => Ok(revision),
            Err(ApiError::RevisionConflict) => {
                warn!(share_id, item_id, last_revision, "revision conflict, refetching");

                let latest = self.api.get_item(share_id, item_id).await?;
                let retry = update_request(item_key, contents, latest.revision)?;
                Ok(self.api.update_item(share_id, item_id, &retry).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}
