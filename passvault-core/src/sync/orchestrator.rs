//! Sync scheduling: periodic runs, backoff, and observable state.
//!
//! One orchestrator per logged-in user. `start` spawns the sync loop;
//! `stop` (logout) shuts it down. State is published through a watch
//! channel, so late subscribers immediately observe the latest state.

use crate::crypto::keys::KeyResolver;
use crate::crypto::CryptoError;
use crate::remote::client::{ApiClient, ApiError};
use crate::remote::{ItemPendingEvent, Share};
use crate::sync::reconciler::EventReconciler;
use crate::sync::SyncConfig;
use crate::PassvaultError;
use ed25519_dalek::VerifyingKey;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scheduling cadence. Foreground syncs often, background rarely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Foreground,
    Background,
}

/// Observable state of the sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Not started, or stopped.
    Idle,
    /// A sync run is in progress.
    Syncing,
    /// The last run completed.
    Synced {
        applied: usize,
        deleted: usize,
        skipped: usize,
    },
    /// The last run failed. `fatal` means the loop has stopped and the
    /// user must re-authenticate.
    Failed { message: String, fatal: bool },
}

/// Totals across all shares in one sync run.
#[derive(Debug, Clone, Copy, Default)]
struct RunTotals {
    applied: usize,
    deleted: usize,
    skipped: usize,
}

/// Drives periodic event reconciliation for all of a user's shares.
pub struct SyncOrchestrator {
    runner: Arc<SyncRunner>,
    mode_tx: watch::Sender<SyncMode>,
    shutdown_tx: watch::Sender<bool>,
    wake: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// The parts of the orchestrator shared with the spawned loop.
struct SyncRunner {
    api: Arc<dyn ApiClient>,
    resolver: Arc<KeyResolver>,
    reconciler: Arc<EventReconciler>,
    config: SyncConfig,
    user_id: String,
    user_address: String,
    state_tx: watch::Sender<SyncState>,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn ApiClient>,
        resolver: Arc<KeyResolver>,
        reconciler: Arc<EventReconciler>,
        config: SyncConfig,
        user_id: &str,
        user_address: &str,
    ) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        let (mode_tx, _) = watch::channel(SyncMode::Foreground);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            runner: Arc::new(SyncRunner {
                api,
                resolver,
                reconciler,
                config,
                user_id: user_id.to_string(),
                user_address: user_address.to_string(),
                state_tx,
            }),
            mode_tx,
            shutdown_tx,
            wake: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Observe sync state. The receiver sees the current state immediately
    /// and every change thereafter.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.runner.state_tx.subscribe()
    }

    pub fn mode(&self) -> SyncMode {
        *self.mode_tx.borrow()
    }

    /// Switch cadence. Takes effect immediately: the loop wakes and
    /// reschedules with the new interval.
    pub fn set_mode(&self, mode: SyncMode) {
        self.mode_tx.send_replace(mode);
    }

    /// Request an immediate sync run, regardless of the schedule.
    pub fn sync_now(&self) {
        self.wake.notify_one();
    }

    /// Start the sync loop. Idempotent while running.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        self.shutdown_tx.send_replace(false);

        let runner = self.runner.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut mode_rx = self.mode_tx.subscribe();
        let wake = self.wake.clone();

        *handle = Some(tokio::spawn(async move {
            info!("sync loop started");
            loop {
                match runner.sync_with_retry().await {
                    Ok(totals) => {
                        runner.state_tx.send_replace(SyncState::Synced {
                            applied: totals.applied,
                            deleted: totals.deleted,
                            skipped: totals.skipped,
                        });
                    }
                    Err(e) => {
                        let fatal = matches!(&e, PassvaultError::Api(ApiError::Unauthenticated));
                        warn!(error = %e, fatal, "sync run failed");
                        runner.state_tx.send_replace(SyncState::Failed {
                            message: e.to_string(),
                            fatal,
                        });
                        if fatal {
                            return;
                        }
                    }
                }

                let interval = match *mode_rx.borrow_and_update() {
                    SyncMode::Foreground => runner.config.foreground_interval,
                    SyncMode::Background => runner.config.background_interval,
                };
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = mode_rx.changed() => {}
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                if *shutdown_rx.borrow() {
                    info!("sync loop stopping");
                    return;
                }
            }
        }));
    }

    /// Stop the sync loop (logout). Safe to call when not running.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        self.wake.notify_one();
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.runner.state_tx.send_replace(SyncState::Idle);
    }
}

impl SyncRunner {
    /// One sync run, retried with exponential backoff on transient errors.
    async fn sync_with_retry(&self) -> crate::Result<RunTotals> {
        let mut delay = self.config.retry_base_delay;
        let mut attempt = 0u32;
        loop {
            match self.sync_once().await {
                Ok(totals) => return Ok(totals),
                Err(e) => {
                    attempt += 1;
                    if !is_retryable(&e) || attempt >= self.config.retry_max_attempts {
                        return Err(e);
                    }
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying sync");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.retry_max_delay);
                }
            }
        }
    }

    /// Sync every share once. A failing share is logged and skipped so the
    /// others still make progress; the first error is surfaced at the end
    /// so the run gets retried. Auth failures abort immediately.
    async fn sync_once(&self) -> crate::Result<RunTotals> {
        self.state_tx.send_replace(SyncState::Syncing);

        let shares = self.api.get_shares().await?;
        debug!(count = shares.len(), "fetched shares");

        let mut totals = RunTotals::default();
        let mut first_err: Option<PassvaultError> = None;
        for share in &shares {
            match self.sync_share(share).await {
                Ok(share_totals) => {
                    totals.applied += share_totals.applied;
                    totals.deleted += share_totals.deleted;
                    totals.skipped += share_totals.skipped;
                }
                Err(e) => {
                    if matches!(&e, PassvaultError::Api(ApiError::Unauthenticated)) {
                        return Err(e);
                    }
                    warn!(share_id = %share.id, error = %e, "share sync failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(totals),
        }
    }

    /// Drain the pending event feed for one share, then apply each batch
    /// against the cursor it was fetched from.
    async fn sync_share(&self, share: &Share) -> crate::Result<RunTotals> {
        let signing_key = verifying_key(&share.signing_key)?;
        self.reconciler.record_share(share)?;

        let stored = self
            .reconciler
            .last_cursor(&self.user_id, &self.user_address, &share.id)?;

        let mut lists = Vec::new();
        let mut cursor = stored.clone();
        loop {
            let events = self
                .api
                .get_pending_events(&share.id, cursor.as_deref())
                .await?;
            let more = events.events_pending;
            cursor = Some(events.last_event_id.clone());
            lists.push(events);
            if !more {
                break;
            }
        }
        let pending = ItemPendingEvent::from_lists(lists);
        if !pending.has_pending_changes() {
            debug!(share_id = %share.id, "no pending changes");
        }

        // A share-structure change anywhere in the feed invalidates cached
        // keys for this share; re-fetch before decrypting any batch.
        let keys = self
            .resolver
            .all_vault_keys(
                &self.user_address,
                &share.id,
                &signing_key,
                pending.update_share_event,
            )
            .await?;

        let mut totals = RunTotals::default();
        let mut since = stored;
        for events in &pending.events {
            let outcome = self
                .reconciler
                .apply_events(
                    &self.user_id,
                    &self.user_address,
                    share,
                    &keys,
                    since.as_deref(),
                    events,
                )
                .await?;
            totals.applied += outcome.applied;
            totals.deleted += outcome.deleted;
            totals.skipped += outcome.skipped;
            since = Some(events.last_event_id.clone());
        }
        Ok(totals)
    }
}

fn is_retryable(err: &PassvaultError) -> bool {
    matches!(err, PassvaultError::Api(e) if e.is_retryable())
}

fn verifying_key(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::KeyNotAccessible("invalid signing key length".to_string()))?;
    VerifyingKey::from_bytes(&raw)
        .map_err(|_| CryptoError::KeyNotAccessible("invalid signing key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ItemContents, CONTENT_FORMAT_VERSION};
    use crate::crypto::cipher::{encrypt, EncryptionTag, SymmetricKey};
    use crate::crypto::keys::key_signature_message;
    use crate::remote::{
        CreateItemRequest, EncryptedItemRevision, ItemIdsRequest, ItemState, ItemsPage,
        PendingEventList, ShareKeyData, UpdateItemRequest,
    };
    use crate::store::{items, Database};
    use aes_gcm::aead::OsRng;
    use async_trait::async_trait;
    use ed25519_dalek::{Signer, SigningKey};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeApi {
        shares: Vec<Share>,
        keys: Vec<ShareKeyData>,
        batches: StdMutex<VecDeque<PendingEventList>>,
        share_calls: AtomicUsize,
        event_failures: AtomicUsize,
        auth_failed: bool,
    }

    #[async_trait]
    impl ApiClient for FakeApi {
        async fn get_shares(&self) -> Result<Vec<Share>, ApiError> {
            self.share_calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_failed {
                return Err(ApiError::Unauthenticated);
            }
            Ok(self.shares.clone())
        }

        async fn get_share_keys(
            &self,
            _user_address: &str,
            _share_id: &str,
        ) -> Result<Vec<ShareKeyData>, ApiError> {
            Ok(self.keys.clone())
        }

        async fn get_pending_events(
            &self,
            _share_id: &str,
            since_event_id: Option<&str>,
        ) -> Result<PendingEventList, ApiError> {
            if self.event_failures.load(Ordering::SeqCst) > 0 {
                self.event_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ApiError::Network("connection reset".to_string()));
            }
            if let Some(batch) = self.batches.lock().unwrap().pop_front() {
                return Ok(batch);
            }
            Ok(PendingEventList {
                last_event_id: since_event_id.unwrap_or("ev-0").to_string(),
                updated_items: vec![],
                deleted_item_ids: vec![],
                events_pending: false,
                update_share_event: false,
            })
        }

        async fn get_items(
            &self,
            _share_id: &str,
            _page_token: Option<&str>,
        ) -> Result<ItemsPage, ApiError> {
            Err(ApiError::InvalidResponse("not used".to_string()))
        }

        async fn get_item(
            &self,
            _share_id: &str,
            _item_id: &str,
        ) -> Result<EncryptedItemRevision, ApiError> {
            Err(ApiError::InvalidResponse("not used".to_string()))
        }

        async fn create_item(
            &self,
            _share_id: &str,
            _request: &CreateItemRequest,
        ) -> Result<EncryptedItemRevision, ApiError> {
            Err(ApiError::InvalidResponse("not used".to_string()))
        }

        async fn update_item(
            &self,
            _share_id: &str,
            _item_id: &str,
            _request: &UpdateItemRequest,
        ) -> Result<EncryptedItemRevision, ApiError> {
            Err(ApiError::InvalidResponse("not used".to_string()))
        }

        async fn trash_items(
            &self,
            _share_id: &str,
            _request: &ItemIdsRequest,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        async fn untrash_items(
            &self,
            _share_id: &str,
            _request: &ItemIdsRequest,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        async fn delete_items(
            &self,
            _share_id: &str,
            _request: &ItemIdsRequest,
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    struct Fixture {
        api: Arc<FakeApi>,
        orchestrator: SyncOrchestrator,
    }

    fn encrypted_note(key: &SymmetricKey, item_id: &str, title: &str) -> EncryptedItemRevision {
        let contents = ItemContents::note(title, "body");
        EncryptedItemRevision {
            item_id: item_id.to_string(),
            revision: 1,
            content_format_version: CONTENT_FORMAT_VERSION,
            key_rotation: 1,
            content: encrypt(
                key,
                &crate::codec::serialize(&contents),
                EncryptionTag::ItemContent,
            )
            .unwrap(),
            key: None,
            state: ItemState::Active,
            alias_email: None,
            create_time: 0,
            modify_time: 0,
            last_use_time: None,
            revision_time: 0,
        }
    }

    fn fixture(batches: Vec<PendingEventList>, event_failures: usize, auth_failed: bool) -> Fixture {
        let master = SymmetricKey::generate();
        let signer = SigningKey::generate(&mut OsRng);
        let vault_key = SymmetricKey::generate();

        let wrapped = encrypt(&master, vault_key.as_bytes(), EncryptionTag::VaultKey).unwrap();
        let signature = signer
            .sign(&key_signature_message("share-1", 1, &wrapped))
            .to_bytes()
            .to_vec();

        let api = Arc::new(FakeApi {
            shares: vec![Share {
                id: "share-1".to_string(),
                vault_id: "vault-1".to_string(),
                address_id: "addr-1".to_string(),
                signing_key: signer.verifying_key().to_bytes().to_vec(),
                create_time: 0,
            }],
            keys: vec![ShareKeyData {
                rotation: 1,
                wrapped_key: wrapped,
                signature,
                create_time: 0,
            }],
            batches: StdMutex::new(batches.into()),
            share_calls: AtomicUsize::new(0),
            event_failures: AtomicUsize::new(event_failures),
            auth_failed,
        });

        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        let reconciler = Arc::new(EventReconciler::new(Arc::new(StdMutex::new(db))));
        let resolver = Arc::new(KeyResolver::new(api.clone(), master));

        let config = SyncConfig {
            foreground_interval: Duration::from_secs(60),
            background_interval: Duration::from_secs(3600),
            retry_base_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(100),
            retry_max_attempts: 3,
        };
        let orchestrator =
            SyncOrchestrator::new(api.clone(), resolver, reconciler, config, "u1", "addr-1");
        Fixture { api, orchestrator }
    }

    async fn wait_for<F: Fn(&SyncState) -> bool>(
        rx: &mut watch::Receiver<SyncState>,
        pred: F,
    ) -> SyncState {
        loop {
            {
                let state = rx.borrow_and_update().clone();
                if pred(&state) {
                    return state;
                }
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_sync_run_publishes_synced() {
        let fx = fixture(vec![], 0, false);
        let mut rx = fx.orchestrator.subscribe();
        assert_eq!(*rx.borrow(), SyncState::Idle);

        fx.orchestrator.start().await;
        let state = wait_for(&mut rx, |s| matches!(s, SyncState::Synced { .. })).await;
        assert_eq!(
            state,
            SyncState::Synced {
                applied: 0,
                deleted: 0,
                skipped: 0
            }
        );

        fx.orchestrator.stop().await;
        assert_eq!(*rx.borrow(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_backs_off_and_recovers() {
        let fx = fixture(vec![], 2, false);
        let mut rx = fx.orchestrator.subscribe();

        fx.orchestrator.start().await;
        let state = wait_for(&mut rx, |s| matches!(s, SyncState::Synced { .. })).await;
        assert!(matches!(state, SyncState::Synced { .. }));
        assert_eq!(fx.api.event_failures.load(Ordering::SeqCst), 0);

        fx.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_publish_nonfatal_failure() {
        // More failures than retry_max_attempts allows in one run.
        let fx = fixture(vec![], 10, false);
        let mut rx = fx.orchestrator.subscribe();

        fx.orchestrator.start().await;
        let state = wait_for(&mut rx, |s| matches!(s, SyncState::Failed { .. })).await;
        match state {
            SyncState::Failed { fatal, .. } => assert!(!fatal),
            other => panic!("unexpected state: {:?}", other),
        }

        fx.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_is_fatal_and_stops_the_loop() {
        let fx = fixture(vec![], 0, true);
        let mut rx = fx.orchestrator.subscribe();

        fx.orchestrator.start().await;
        let state = wait_for(&mut rx, |s| matches!(s, SyncState::Failed { .. })).await;
        match state {
            SyncState::Failed { fatal, .. } => assert!(fatal),
            other => panic!("unexpected state: {:?}", other),
        }

        let calls = fx.api.share_calls.load(Ordering::SeqCst);
        // The loop exited: advancing time produces no further runs.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fx.api.share_calls.load(Ordering::SeqCst), calls);

        fx.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resyncs_on_the_foreground_interval() {
        let fx = fixture(vec![], 0, false);
        let mut rx = fx.orchestrator.subscribe();

        fx.orchestrator.start().await;
        wait_for(&mut rx, |s| matches!(s, SyncState::Synced { .. })).await;
        let first = fx.api.share_calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(fx.api.share_calls.load(Ordering::SeqCst) > first);

        fx.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sync_now_triggers_an_immediate_run() {
        let fx = fixture(vec![], 0, false);
        let mut rx = fx.orchestrator.subscribe();

        fx.orchestrator.start().await;
        wait_for(&mut rx, |s| matches!(s, SyncState::Synced { .. })).await;
        let first = fx.api.share_calls.load(Ordering::SeqCst);

        fx.orchestrator.sync_now();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fx.api.share_calls.load(Ordering::SeqCst) > first);

        fx.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drains_multi_batch_event_feed_into_the_store() {
        // Shared vault key so batch fixtures decrypt under the fixture's
        // wrapped key: regenerate the fixture wiring by hand.
        let master = SymmetricKey::generate();
        let signer = SigningKey::generate(&mut OsRng);
        let vault_key = SymmetricKey::generate();

        let wrapped = encrypt(&master, vault_key.as_bytes(), EncryptionTag::VaultKey).unwrap();
        let signature = signer
            .sign(&key_signature_message("share-1", 1, &wrapped))
            .to_bytes()
            .to_vec();

        let batches = vec![
            PendingEventList {
                last_event_id: "ev-1".to_string(),
                updated_items: vec![encrypted_note(&vault_key, "i1", "one")],
                deleted_item_ids: vec![],
                events_pending: true,
                update_share_event: false,
            },
            PendingEventList {
                last_event_id: "ev-2".to_string(),
                updated_items: vec![encrypted_note(&vault_key, "i2", "two")],
                deleted_item_ids: vec![],
                events_pending: false,
                update_share_event: false,
            },
        ];

        let api = Arc::new(FakeApi {
            shares: vec![Share {
                id: "share-1".to_string(),
                vault_id: "vault-1".to_string(),
                address_id: "addr-1".to_string(),
                signing_key: signer.verifying_key().to_bytes().to_vec(),
                create_time: 0,
            }],
            keys: vec![ShareKeyData {
                rotation: 1,
                wrapped_key: wrapped,
                signature,
                create_time: 0,
            }],
            batches: StdMutex::new(batches.into()),
            share_calls: AtomicUsize::new(0),
            event_failures: AtomicUsize::new(0),
            auth_failed: false,
        });

        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        let reconciler = Arc::new(EventReconciler::new(Arc::new(StdMutex::new(db))));
        let resolver = Arc::new(KeyResolver::new(api.clone(), master));
        let orchestrator = SyncOrchestrator::new(
            api.clone(),
            resolver,
            reconciler.clone(),
            SyncConfig::default(),
            "u1",
            "addr-1",
        );

        let mut rx = orchestrator.subscribe();
        orchestrator.start().await;
        let state = wait_for(&mut rx, |s| matches!(s, SyncState::Synced { .. })).await;
        assert_eq!(
            state,
            SyncState::Synced {
                applied: 2,
                deleted: 0,
                skipped: 0
            }
        );
        orchestrator.stop().await;

        let db = reconciler.database();
        let db = db.lock().unwrap();
        assert_eq!(items::list_items(db.conn(), "share-1").unwrap().len(), 2);
        assert_eq!(
            crate::store::cursors::get_cursor(db.conn(), "u1", "addr-1", "share-1").unwrap(),
            Some("ev-2".to_string())
        );
    }
}
