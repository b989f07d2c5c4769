//! Applying server event batches to the local store.
//!
//! A batch is applied transactionally: item upserts, deletions and the
//! cursor advance commit together or not at all. Applying the same batch
//! twice is a no-op, and an undecryptable item is skipped without poisoning
//! the rest of its batch.

use crate::crypto::keys::ShareKey;
use crate::item::OpenItem;
use crate::remote::{PendingEventList, Share};
use crate::store::{cursors, items, shares, Database, ItemRecord, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What a single `apply_events` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Item rows inserted or updated.
    pub applied: usize,
    /// Item rows deleted.
    pub deleted: usize,
    /// Revisions dropped because they failed decryption or parsing.
    pub skipped: usize,
    /// Whether the cursor moved. `false` means the batch was a replay.
    pub cursor_advanced: bool,
}

/// Applies pending event batches to the local store.
///
/// Batches for the same share are serialized through a per-share async
/// lock; batches for different shares may apply concurrently.
pub struct EventReconciler {
    db: Arc<StdMutex<Database>>,
    share_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventReconciler {
    pub fn new(db: Arc<StdMutex<Database>>) -> Self {
        Self {
            db,
            share_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store, shared with readers.
    pub fn database(&self) -> Arc<StdMutex<Database>> {
        self.db.clone()
    }

    /// Stored event cursor for a share, if any.
    pub fn last_cursor(
        &self,
        user_id: &str,
        address_id: &str,
        share_id: &str,
    ) -> crate::Result<Option<String>> {
        let db = self.lock_db()?;
        Ok(cursors::get_cursor(db.conn(), user_id, address_id, share_id)?)
    }

    /// Persist a share record (metadata and signing key).
    pub fn record_share(&self, share: &Share) -> crate::Result<()> {
        let db = self.lock_db()?;
        Ok(shares::upsert_share(db.conn(), share)?)
    }

    /// Remove a share and its items, e.g. after the user loses access.
    pub fn forget_share(&self, share_id: &str) -> crate::Result<()> {
        let db = self.lock_db()?;
        Ok(shares::delete_share(db.conn(), share_id)?)
    }

    /// Apply one event batch for a share.
    ///
    /// `since` is the cursor the batch was fetched against. The batch only
    /// commits if the stored cursor still equals `since`; a batch whose
    /// base was superseded by a concurrent writer is dropped, so the stored
    /// cursor can never move backwards in the feed.
    ///
    /// Each updated revision is validated by full decryption before any row
    /// is written; revisions that fail are skipped and counted, never
    /// aborting the batch. All writes plus the cursor advance happen in a
    /// single transaction.
    pub async fn apply_events(
        &self,
        user_id: &str,
        address_id: &str,
        share: &Share,
        share_keys: &[Arc<ShareKey>],
        since: Option<&str>,
        events: &PendingEventList,
    ) -> crate::Result<ApplyOutcome> {
        let share_lock = self.share_lock(&share.id).await;
        let _serialized = share_lock.lock().await;

        {
            let db = self.lock_db()?;
            let stored = cursors::get_cursor(db.conn(), user_id, address_id, &share.id)?;
            if stored.as_deref() == Some(events.last_event_id.as_str()) {
                debug!(share_id = %share.id, cursor = %events.last_event_id, "batch already applied");
                return Ok(ApplyOutcome::default());
            }
            if stored.as_deref() != since {
                debug!(
                    share_id = %share.id,
                    cursor = %events.last_event_id,
                    "base cursor superseded, dropping batch"
                );
                return Ok(ApplyOutcome::default());
            }
        }

        // Validate before writing: a revision we cannot decrypt must not
        // reach the store, and must not sink the rest of the batch.
        let mut skipped = 0usize;
        let mut records = Vec::with_capacity(events.updated_items.len());
        for revision in &events.updated_items {
            match OpenItem::open(revision, share, share_keys) {
                Ok(_) => records.push(ItemRecord::from_revision(&share.id, revision)),
                Err(e) => {
                    warn!(
                        share_id = %share.id,
                        item_id = %revision.item_id,
                        revision = revision.revision,
                        error = %e,
                        "skipping undecryptable item revision"
                    );
                    skipped += 1;
                }
            }
        }

        let mut db = self.lock_db()?;
        let tx = db.transaction()?;

        let mut applied = 0usize;
        let mut deleted = 0usize;
        for item_id in &events.deleted_item_ids {
            if items::delete_item(&tx, &share.id, item_id)? {
                deleted += 1;
            }
        }
        for record in &records {
            if items::upsert_item(&tx, record)? {
                applied += 1;
            }
        }
        cursors::set_cursor(&tx, user_id, address_id, &share.id, &events.last_event_id)?;
        tx.commit().map_err(StoreError::from)?;

        debug!(
            share_id = %share.id,
            cursor = %events.last_event_id,
            applied, deleted, skipped,
            "applied event batch"
        );
        Ok(ApplyOutcome {
            applied,
            deleted,
            skipped,
            cursor_advanced: true,
        })
    }

    async fn share_lock(&self, share_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.share_locks.lock().await;
        locks
            .entry(share_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lock_db(&self) -> crate::Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()).into())
    }
}
