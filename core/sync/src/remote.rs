//! The server as seen by the sync engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keyhaven_common::{ItemId, Result};
use keyhaven_storage::VaultItem;
use keyhaven_vault::api::{InsertResponse, SyncResponse};

/// Item operations bound to one authenticated identity.
///
/// Implementations carry their own credential; the owner is never passed
/// explicitly. Transport failures must surface as `Error::Network` so the
/// retry executor can tell them apart from permanent failures.
#[async_trait]
pub trait SyncRemote: Send + Sync {
    /// All ids held for the owner, plus items changed strictly after
    /// `since` (everything when `since` is `None`).
    async fn sync(&self, since: Option<DateTime<Utc>>) -> Result<SyncResponse>;

    /// Create an item.
    async fn insert(&self, item: &VaultItem) -> Result<InsertResponse>;

    /// Replace an item.
    async fn update(&self, item: &VaultItem) -> Result<InsertResponse>;

    /// Delete an item.
    async fn delete(&self, id: &ItemId) -> Result<InsertResponse>;
}
