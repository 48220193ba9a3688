//! Sync transport that calls the server directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::Server;
use keyhaven_common::{Error, IdentityId, ItemId, Result};
use keyhaven_storage::VaultItem;
use keyhaven_sync::SyncRemote;
use keyhaven_vault::api::{InsertResponse, SyncResponse};

/// A [`SyncRemote`] bound to one bearer token.
///
/// Every call resolves the token first; an unknown or revoked token fails
/// with `Authentication`. Errors from the item service come back in their
/// public form, exactly as a network client would see them.
pub struct InProcessRemote {
    server: Arc<Server>,
    token: String,
}

impl InProcessRemote {
    pub fn new(server: Arc<Server>, token: impl Into<String>) -> Self {
        Self {
            server,
            token: token.into(),
        }
    }

    async fn owner(&self) -> Result<IdentityId> {
        self.server.sessions().resolve(&self.token).await
    }
}

#[async_trait]
impl SyncRemote for InProcessRemote {
    async fn sync(&self, since: Option<DateTime<Utc>>) -> Result<SyncResponse> {
        let owner = self.owner().await?;
        self.server
            .items()
            .sync(owner, since)
            .await
            .map_err(Error::into_public)
    }

    async fn insert(&self, item: &VaultItem) -> Result<InsertResponse> {
        let owner = self.owner().await?;
        self.server
            .items()
            .insert(owner, item.clone())
            .await
            .map_err(Error::into_public)
    }

    async fn update(&self, item: &VaultItem) -> Result<InsertResponse> {
        let owner = self.owner().await?;
        self.server
            .items()
            .update(owner, &item.id, item.clone())
            .await
            .map_err(Error::into_public)
    }

    async fn delete(&self, id: &ItemId) -> Result<InsertResponse> {
        let owner = self.owner().await?;
        self.server
            .items()
            .delete(owner, id)
            .await
            .map_err(Error::into_public)
    }
}
