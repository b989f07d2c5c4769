//! HTTP API client for the sync backend.
//!
//! All methods return typed results and never panic across the boundary.
//! The `ApiClient` trait is the seam the reconciler and orchestrator are
//! built against; tests substitute in-memory fakes.

use crate::crypto::keys::ShareKeySource;
use crate::remote::{
    CreateItemRequest, EncryptedItemRevision, ItemIdsRequest, ItemsPage, PendingEventList, Share,
    ShareKeyData, UpdateItemRequest,
};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Server error code for a stale `last_revision` on update.
const CODE_REVISION_CONFLICT: u32 = 300_002;
/// Server error code for the alias quota being exhausted.
const CODE_ALIAS_LIMIT: u32 = 300_007;

/// Errors crossing the network boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Request rejected: HTTP {status}: {message}")]
    BadRequest { status: u16, message: String },

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Item was modified elsewhere (revision conflict)")]
    RevisionConflict,

    #[error("Cannot create more aliases")]
    AliasLimitReached,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether the sync orchestrator may retry this error with backoff.
    ///
    /// Timeouts, transport failures and 5xx responses are transient.
    /// Conflicts, quota errors and auth failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Server { .. }
        )
    }
}

/// The network surface consumed by the sync core.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get_shares(&self) -> Result<Vec<Share>, ApiError>;

    async fn get_share_keys(
        &self,
        user_address: &str,
        share_id: &str,
    ) -> Result<Vec<ShareKeyData>, ApiError>;

    /// Fetch the pending event list for a share since the given cursor.
    /// `None` means "from the beginning".
    async fn get_pending_events(
        &self,
        share_id: &str,
        since_event_id: Option<&str>,
    ) -> Result<PendingEventList, ApiError>;

    /// Fetch one page of item revisions for a share.
    async fn get_items(
        &self,
        share_id: &str,
        page_token: Option<&str>,
    ) -> Result<ItemsPage, ApiError>;

    async fn get_item(
        &self,
        share_id: &str,
        item_id: &str,
    ) -> Result<EncryptedItemRevision, ApiError>;

    async fn create_item(
        &self,
        share_id: &str,
        request: &CreateItemRequest,
    ) -> Result<EncryptedItemRevision, ApiError>;

    async fn update_item(
        &self,
        share_id: &str,
        item_id: &str,
        request: &UpdateItemRequest,
    ) -> Result<EncryptedItemRevision, ApiError>;

    async fn trash_items(&self, share_id: &str, request: &ItemIdsRequest) -> Result<(), ApiError>;

    async fn untrash_items(&self, share_id: &str, request: &ItemIdsRequest)
        -> Result<(), ApiError>;

    async fn delete_items(&self, share_id: &str, request: &ItemIdsRequest) -> Result<(), ApiError>;
}

/// Any API client can serve as the resolver's key source.
#[async_trait]
impl<T: ApiClient> ShareKeySource for T {
    async fn share_keys(
        &self,
        user_address: &str,
        share_id: &str,
    ) -> Result<Vec<ShareKeyData>, ApiError> {
        self.get_share_keys(user_address, share_id).await
    }
}

/// Error body returned by the API on 4xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    error: String,
}

/// reqwest-backed implementation of [`ApiClient`].
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpApiClient {
    /// Create a new client for the given backend.
    pub fn new(base_url: &str, access_token: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(map_transport_error)?;
        decode_response(resp).await
    }

    async fn send_json<T: serde::de::DeserializeOwned, B: serde::Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .request(method, &url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        decode_response(resp).await
    }
}

fn map_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Network(e.to_string())
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()));
    }

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ApiError::Unauthenticated);
    }
    if status.is_server_error() {
        return Err(ApiError::Server {
            status: status.as_u16(),
        });
    }

    let body: ApiErrorBody = resp.json().await.unwrap_or(ApiErrorBody {
        code: 0,
        error: String::new(),
    });
    Err(match body.code {
        CODE_REVISION_CONFLICT => ApiError::RevisionConflict,
        CODE_ALIAS_LIMIT => ApiError::AliasLimitReached,
        _ => ApiError::BadRequest {
            status: status.as_u16(),
            message: body.error,
        },
    })
}

/// Empty success body for endpoints that return nothing useful.
#[derive(Debug, Deserialize)]
struct Empty {}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn get_shares(&self) -> Result<Vec<Share>, ApiError> {
        self.get_json("/v1/shares").await
    }

    async fn get_share_keys(
        &self,
        user_address: &str,
        share_id: &str,
    ) -> Result<Vec<ShareKeyData>, ApiError> {
        self.get_json(&format!(
            "/v1/shares/{}/keys?address={}",
            share_id, user_address
        ))
        .await
    }

    async fn get_pending_events(
        &self,
        share_id: &str,
        since_event_id: Option<&str>,
    ) -> Result<PendingEventList, ApiError> {
        let path = match since_event_id {
            Some(cursor) => format!("/v1/shares/{}/events/{}", share_id, cursor),
            None => format!("/v1/shares/{}/events", share_id),
        };
        self.get_json(&path).await
    }

    async fn get_items(
        &self,
        share_id: &str,
        page_token: Option<&str>,
    ) -> Result<ItemsPage, ApiError> {
        let path = match page_token {
            Some(token) => format!("/v1/shares/{}/items?since={}", share_id, token),
            None => format!("/v1/shares/{}/items", share_id),
        };
        self.get_json(&path).await
    }

    async fn get_item(
        &self,
        share_id: &str,
        item_id: &str,
    ) -> Result<EncryptedItemRevision, ApiError> {
        self.get_json(&format!("/v1/shares/{}/items/{}", share_id, item_id))
            .await
    }

    async fn create_item(
        &self,
        share_id: &str,
        request: &CreateItemRequest,
    ) -> Result<EncryptedItemRevision, ApiError> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/shares/{}/items", share_id),
            request,
        )
        .await
    }

    async fn update_item(
        &self,
        share_id: &str,
        item_id: &str,
        request: &UpdateItemRequest,
    ) -> Result<EncryptedItemRevision, ApiError> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/v1/shares/{}/items/{}", share_id, item_id),
            request,
        )
        .await
    }

    async fn trash_items(&self, share_id: &str, request: &ItemIdsRequest) -> Result<(), ApiError> {
        let _: Empty = self
            .send_json(
                reqwest::Method::POST,
                &format!("/v1/shares/{}/items/trash", share_id),
                request,
            )
            .await?;
        Ok(())
    }

    async fn untrash_items(
        &self,
        share_id: &str,
        request: &ItemIdsRequest,
    ) -> Result<(), ApiError> {
        let _: Empty = self
            .send_json(
                reqwest::Method::POST,
                &format!("/v1/shares/{}/items/untrash", share_id),
                request,
            )
            .await?;
        Ok(())
    }

    async fn delete_items(&self, share_id: &str, request: &ItemIdsRequest) -> Result<(), ApiError> {
        let _: Empty = self
            .send_json(
                reqwest::Method::POST,
                &format!("/v1/shares/{}/items/delete", share_id),
                request,
            )
            .await?;
        Ok(())
    }
}
