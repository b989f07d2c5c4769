//! End-to-end pipeline: wrapped keys and encrypted revisions come in over
//! the (fake) API, flow through the orchestrator and reconciler, land as
//! ciphertext rows in SQLite, and open back into decrypted items.

use aes_gcm::aead::OsRng;
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use passvault_core::codec::{ItemContents, CONTENT_FORMAT_VERSION};
use passvault_core::crypto::keys::{key_signature_message, resolve_item_key};
use passvault_core::remote::client::{ApiClient, ApiError};
use passvault_core::remote::{
    CreateItemRequest, EncryptedItemRevision, ItemIdsRequest, ItemState, ItemsPage,
    PendingEventList, Share, ShareKeyData, UpdateItemRequest,
};
use passvault_core::store::{cursors, items, Database};
use passvault_core::{
    codec, encrypt, EncryptionTag, EventReconciler, ItemType, KeyResolver, OpenItem, SymmetricKey,
    SyncConfig, SyncOrchestrator, SyncState, VaultKey,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

struct ScriptedApi {
    shares: Vec<Share>,
    keys: Vec<ShareKeyData>,
    batches: StdMutex<VecDeque<PendingEventList>>,
    key_fetches: AtomicUsize,
}

#[async_trait]
impl ApiClient for ScriptedApi {
    async fn get_shares(&self) -> Result<Vec<Share>, ApiError> {
        Ok(self.shares.clone())
    }

    async fn get_share_keys(
        &self,
        _user_address: &str,
        _share_id: &str,
    ) -> Result<Vec<ShareKeyData>, ApiError> {
        self.key_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.keys.clone())
    }

    async fn get_pending_events(
        &self,
        _share_id: &str,
        since_event_id: Option<&str>,
    ) -> Result<PendingEventList, ApiError> {
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

    async fn trash_items(&self, _share_id: &str, _request: &ItemIdsRequest) -> Result<(), ApiError> {
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

/// Everything a simulated backend needs: a user master key, a signed
/// wrapped vault key, and item revisions encrypted under per-item keys.
struct Backend {
    master: SymmetricKey,
    vault_key: SymmetricKey,
    share: Share,
    key_data: ShareKeyData,
}

impl Backend {
    fn new() -> Self {
        let master = SymmetricKey::generate();
        let signer = SigningKey::generate(&mut OsRng);
        let vault_key = SymmetricKey::generate();

        let wrapped = encrypt(&master, vault_key.as_bytes(), EncryptionTag::VaultKey).unwrap();
        let signature = signer
            .sign(&key_signature_message("share-1", 1, &wrapped))
            .to_bytes()
            .to_vec();

        Backend {
            master: master.clone(),
            vault_key,
            share: Share {
                id: "share-1".to_string(),
                vault_id: "vault-1".to_string(),
                address_id: "addr-1".to_string(),
                signing_key: signer.verifying_key().to_bytes().to_vec(),
                create_time: 1700000000,
            },
            key_data: ShareKeyData {
                rotation: 1,
                wrapped_key: wrapped,
                signature,
                create_time: 1700000000,
            },
        }
    }

    /// Encrypt a login revision under a fresh wrapped item key, the way
    /// another client would have created it.
    fn login_revision(&self, item_id: &str, revision: u64, username: &str) -> EncryptedItemRevision {
        let item_key = SymmetricKey::generate();
        let wrapped_item_key = encrypt(
            &self.vault_key,
            item_key.as_bytes(),
            EncryptionTag::ItemKey,
        )
        .unwrap();

        let contents = ItemContents::login("Login", "", username, "s3cret!", vec![]);
        EncryptedItemRevision {
            item_id: item_id.to_string(),
            revision,
            content_format_version: CONTENT_FORMAT_VERSION,
            key_rotation: 1,
            content: encrypt(
                &item_key,
                &codec::serialize(&contents),
                EncryptionTag::ItemContent,
            )
            .unwrap(),
            key: Some(wrapped_item_key),
            state: ItemState::Active,
            alias_email: None,
            create_time: 1700000001,
            modify_time: 1700000002,
            last_use_time: None,
            revision_time: 1700000002,
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn pipeline(
    backend: &Backend,
    batches: Vec<PendingEventList>,
) -> (Arc<ScriptedApi>, Arc<EventReconciler>, SyncOrchestrator) {
    let api = Arc::new(ScriptedApi {
        shares: vec![backend.share.clone()],
        keys: vec![backend.key_data.clone()],
        batches: StdMutex::new(batches.into()),
        key_fetches: AtomicUsize::new(0),
    });

    let db = Database::in_memory().unwrap();
    db.initialize_schema().unwrap();
    let reconciler = Arc::new(EventReconciler::new(Arc::new(StdMutex::new(db))));
    let resolver = Arc::new(KeyResolver::new(api.clone(), backend.master.clone()));
    let orchestrator = SyncOrchestrator::new(
        api.clone(),
        resolver,
        reconciler.clone(),
        SyncConfig::default(),
        "u1",
        "addr-1",
    );
    (api, reconciler, orchestrator)
}

async fn wait_synced(orchestrator: &SyncOrchestrator) -> SyncState {
    let mut rx = orchestrator.subscribe();
    loop {
        {
            let state = rx.borrow_and_update().clone();
            if matches!(state, SyncState::Synced { .. } | SyncState::Failed { .. }) {
                return state;
            }
        }
        rx.changed().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn full_sync_lands_ciphertext_rows_that_open_to_items() {
    init_tracing();
    let backend = Backend::new();
    let batch = PendingEventList {
        last_event_id: "ev-1".to_string(),
        updated_items: vec![
            backend.login_revision("item-1", 1, "alice"),
            backend.login_revision("item-2", 3, "bob"),
        ],
        deleted_item_ids: vec![],
        events_pending: false,
        update_share_event: false,
    };
    let (_api, reconciler, orchestrator) = pipeline(&backend, vec![batch]);

    orchestrator.start().await;
    let state = wait_synced(&orchestrator).await;
    orchestrator.stop().await;
    assert_eq!(
        state,
        SyncState::Synced {
            applied: 2,
            deleted: 0,
            skipped: 0
        }
    );

    let db = reconciler.database();
    let db = db.lock().unwrap();

    // The share record and cursor were persisted alongside the items.
    assert_eq!(
        cursors::get_cursor(db.conn(), "u1", "addr-1", "share-1").unwrap(),
        Some("ev-1".to_string())
    );

    // Rows hold ciphertext; opening them goes through the same path as
    // wire revisions.
    let stored = items::get_item(db.conn(), "share-1", "item-1")
        .unwrap()
        .unwrap();
    let revision = stored.into_revision();

    let keys = vec![Arc::new(VaultKey {
        rotation: 1,
        key: backend.vault_key.clone(),
        create_time: 1700000000,
    })];
    let item = OpenItem::open(&revision, &backend.share, &keys).unwrap();
    assert_eq!(item.title, "Login");
    assert_eq!(item.username(), Some("alice"));

    let item_key = resolve_item_key(&keys[0], revision.key.as_deref()).unwrap();
    match &item.item_type {
        ItemType::Login { password, .. } => {
            assert_eq!(password.reveal(&item_key.key).unwrap(), "s3cret!");
        }
        other => panic!("expected login item, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn deletion_events_remove_rows_and_replays_are_noops() {
    init_tracing();
    let backend = Backend::new();
    let batches = vec![
        PendingEventList {
            last_event_id: "ev-1".to_string(),
            updated_items: vec![backend.login_revision("item-1", 1, "alice")],
            deleted_item_ids: vec![],
            events_pending: true,
            update_share_event: false,
        },
        PendingEventList {
            last_event_id: "ev-2".to_string(),
            updated_items: vec![],
            deleted_item_ids: vec!["item-1".to_string()],
            events_pending: false,
            update_share_event: false,
        },
    ];
    let (_api, reconciler, orchestrator) = pipeline(&backend, vec![batches[0].clone(), batches[1].clone()]);

    orchestrator.start().await;
    let state = wait_synced(&orchestrator).await;
    orchestrator.stop().await;
    assert_eq!(
        state,
        SyncState::Synced {
            applied: 1,
            deleted: 1,
            skipped: 0
        }
    );

    // Re-applying the final batch directly is a cursor no-op.
    let keys = vec![Arc::new(VaultKey {
        rotation: 1,
        key: backend.vault_key.clone(),
        create_time: 1700000000,
    })];
    let outcome = reconciler
        .apply_events(
            "u1",
            "addr-1",
            &backend.share,
            &keys,
            Some("ev-1"),
            &batches[1],
        )
        .await
        .unwrap();
    assert!(!outcome.cursor_advanced);

    let db = reconciler.database();
    let db = db.lock().unwrap();
    assert!(items::get_item(db.conn(), "share-1", "item-1")
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn share_structure_event_forces_a_key_refetch() {
    init_tracing();
    let backend = Backend::new();
    // The share event arrives in a later run, after keys are cached.
    let batches = vec![
        PendingEventList {
            last_event_id: "ev-1".to_string(),
            updated_items: vec![backend.login_revision("item-1", 1, "alice")],
            deleted_item_ids: vec![],
            events_pending: false,
            update_share_event: false,
        },
        PendingEventList {
            last_event_id: "ev-2".to_string(),
            updated_items: vec![],
            deleted_item_ids: vec![],
            events_pending: false,
            update_share_event: true,
        },
    ];
    let (api, _reconciler, orchestrator) = pipeline(&backend, batches);

    orchestrator.start().await;
    wait_synced(&orchestrator).await;
    assert_eq!(api.key_fetches.load(Ordering::SeqCst), 1);

    // The next scheduled run sees the share event and bypasses the cache.
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    assert_eq!(api.key_fetches.load(Ordering::SeqCst), 2);

    orchestrator.stop().await;
}
