//! Storage backend traits.
//!
//! The server consumes storage only through these two traits. Both are
//! keyed by id and owner, and items are queryable by modification time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::records::{IdentityRecord, VaultItem};
use keyhaven_common::{IdentityId, ItemId, Result};

/// Durable storage for encrypted vault items.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Look up an item by id, regardless of owner.
    async fn get(&self, id: &ItemId) -> Result<Option<VaultItem>>;

    /// Every item currently held for `owner`.
    async fn get_all(&self, owner: &IdentityId) -> Result<Vec<VaultItem>>;

    /// Items for `owner` whose `last_modified` is strictly after `since`.
    async fn get_modified_since(
        &self,
        owner: &IdentityId,
        since: DateTime<Utc>,
    ) -> Result<Vec<VaultItem>> {
        let items = self.get_all(owner).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.last_modified > since)
            .collect())
    }

    /// Largest `last_modified` across every owner, or `None` when empty.
    async fn latest_modified(&self) -> Result<Option<DateTime<Utc>>>;

    /// Store a new item.
    ///
    /// # Errors
    /// - `Conflict` if an item with the same id already exists
    async fn insert(&self, item: VaultItem) -> Result<()>;

    /// Replace an existing item.
    ///
    /// # Errors
    /// - `NotFound` if no item with that id exists
    async fn save(&self, item: VaultItem) -> Result<()>;

    /// Remove an item. Returns whether anything was removed.
    ///
    /// No tombstone is kept.
    async fn delete(&self, id: &ItemId) -> Result<bool>;
}

/// Durable storage for identity records.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up by id.
    async fn get(&self, id: &IdentityId) -> Result<Option<IdentityRecord>>;

    /// Look up by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>>;

    /// Store a new identity.
    ///
    /// # Errors
    /// - `Conflict` if the id or email is already registered
    async fn insert(&self, record: IdentityRecord) -> Result<()>;

    /// Replace the record as one atomic write, but only if the stored
    /// `last_password_change` still equals `expected_last_password_change`.
    ///
    /// # Postconditions
    /// - Readers observe either the old record or the new one, never a mix
    ///
    /// # Errors
    /// - `NotFound` if the identity does not exist
    /// - `Conflict` if another writer changed the password first
    async fn compare_and_swap(
        &self,
        record: IdentityRecord,
        expected_last_password_change: DateTime<Utc>,
    ) -> Result<()>;
}
