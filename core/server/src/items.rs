//! Item endpoints.
//!
//! The server treats ciphertext as opaque: it checks ownership, size and
//! schema version, stamps timestamps, and answers sync queries.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::clock::MonotonicClock;
use crate::config::ServerConfig;
use keyhaven_common::{Error, IdentityId, ItemId, Result};
use keyhaven_storage::{ItemStore, VaultItem, ITEM_SCHEMA_VERSION};
use keyhaven_vault::api::{InsertResponse, SyncResponse};

/// Server-side item operations.
pub struct ItemService {
    store: Arc<dyn ItemStore>,
    clock: Arc<MonotonicClock>,
    config: ServerConfig,
    /// Held while a write is stamped and stored, and while a sync reads
    /// its clock and snapshot. A write can then never carry a timestamp at
    /// or before a sync's `server_time` without being in that snapshot.
    gate: Mutex<()>,
    /// Set once the clock has caught up with the newest stored stamp.
    seeded: OnceCell<()>,
}

impl ItemService {
    pub fn new(store: Arc<dyn ItemStore>, clock: Arc<MonotonicClock>, config: ServerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            gate: Mutex::new(()),
            seeded: OnceCell::new(),
        }
    }

    /// Advance the clock past every stamp already in the store.
    ///
    /// Rows written by an earlier process may carry stamps ahead of this
    /// one's wall clock. Retried on the next call if the store read fails.
    async fn ensure_seeded(&self) -> Result<()> {
        self.seeded
            .get_or_try_init(|| async move {
                if let Some(latest) = self.store.latest_modified().await? {
                    self.clock.observe(latest);
                    debug!(latest = %latest, "Clock seeded from store");
                }
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Store a new item for `owner`.
    ///
    /// # Errors
    /// - `Authorization` if the body names another owner
    /// - `Conflict` if the id is taken
    /// - `Validation` for an empty or oversized ciphertext or unknown version
    pub async fn insert(&self, owner: IdentityId, mut item: VaultItem) -> Result<InsertResponse> {
        if item.owner != owner {
            return Err(Error::Authorization(format!("Item {} owner mismatch", item.id)));
        }
        self.validate(&item)?;

        let _gate = self.gate.lock().await;
        self.ensure_seeded().await?;
        let now = self.clock.now();
        item.created = now;
        item.last_modified = now;
        let id = item.id;
        self.store.insert(item).await?;

        debug!(item_id = %id, owner = %owner, "Item inserted");
        Ok(InsertResponse { id })
    }

    /// Fetch one item.
    pub async fn get(&self, owner: IdentityId, id: &ItemId) -> Result<VaultItem> {
        match self.store.get(id).await? {
            Some(item) if item.owner == owner => Ok(item),
            Some(_) => Err(Error::Authorization(format!("Item {}", id))),
            None => Err(Error::NotFound(format!("Item {}", id))),
        }
    }

    /// Every item of `owner`.
    pub async fn get_all(&self, owner: IdentityId) -> Result<Vec<VaultItem>> {
        self.store.get_all(&owner).await
    }

    /// Replace the ciphertext and flags of an existing item.
    ///
    /// # Postconditions
    /// - `owner` and `created` come from the stored row, not the body
    /// - `last_modified` is strictly later than the stored one, even if the
    ///   stored stamp is ahead of this process's clock
    ///
    /// # Errors
    /// - `Validation` if `id` differs from the body's id
    /// - `NotFound` / `Authorization` if missing or owned by someone else
    pub async fn update(
        &self,
        owner: IdentityId,
        id: &ItemId,
        item: VaultItem,
    ) -> Result<InsertResponse> {
        if item.id != *id {
            return Err(Error::Validation("Item id does not match body".to_string()));
        }
        self.validate(&item)?;

        let _gate = self.gate.lock().await;
        self.ensure_seeded().await?;
        let stored = self.get(owner, id).await?;
        self.clock.observe(stored.last_modified);
        let updated = VaultItem {
            owner: stored.owner,
            created: stored.created,
            last_modified: self.clock.now(),
            ..item
        };
        self.store.save(updated).await?;

        debug!(item_id = %id, owner = %owner, "Item updated");
        Ok(InsertResponse { id: *id })
    }

    /// Remove an item for good.
    pub async fn delete(&self, owner: IdentityId, id: &ItemId) -> Result<InsertResponse> {
        let _gate = self.gate.lock().await;
        self.get(owner, id).await?;
        if !self.store.delete(id).await? {
            return Err(Error::NotFound(format!("Item {}", id)));
        }

        info!(item_id = %id, owner = %owner, "Item deleted");
        Ok(InsertResponse { id: *id })
    }

    /// Full id set plus everything modified strictly after `since`.
    ///
    /// `server_time` is at least every returned stamp, and anything written
    /// after this call is strictly newer than it.
    pub async fn sync(
        &self,
        owner: IdentityId,
        since: Option<DateTime<Utc>>,
    ) -> Result<SyncResponse> {
        let _gate = self.gate.lock().await;
        self.ensure_seeded().await?;

        let all = self.store.get_all(&owner).await?;
        if let Some(latest) = all.iter().map(|item| item.last_modified).max() {
            self.clock.observe(latest);
        }
        let server_time = self.clock.now();

        let ids = all.iter().map(|item| item.id).collect();
        let items = match since {
            Some(since) => all
                .into_iter()
                .filter(|item| item.last_modified > since)
                .collect(),
            None => all,
        };

        Ok(SyncResponse {
            ids,
            items,
            server_time,
        })
    }

    fn validate(&self, item: &VaultItem) -> Result<()> {
        if item.ciphertext.is_empty() {
            return Err(Error::Validation("Empty ciphertext".to_string()));
        }
        if item.ciphertext.len() > self.config.max_item_size {
            return Err(Error::Validation(format!(
                "Ciphertext of {} bytes exceeds limit of {}",
                item.ciphertext.len(),
                self.config.max_item_size
            )));
        }
        if item.version != ITEM_SCHEMA_VERSION {
            return Err(Error::Validation(format!(
                "Unsupported item version {}",
                item.version
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhaven_storage::{ItemType, MemoryStore};

    fn service() -> ItemService {
        ItemService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MonotonicClock::new()),
            ServerConfig::default().with_max_item_size(256),
        )
    }

    fn item(owner: IdentityId) -> VaultItem {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        VaultItem {
            id: ItemId::generate(),
            owner,
            item_type: ItemType::Login,
            ciphertext: vec![7u8; 64],
            collection: None,
            favorite: false,
            re_prompt: false,
            version: ITEM_SCHEMA_VERSION,
            created: epoch,
            last_modified: epoch,
        }
    }

    #[tokio::test]
    async fn test_insert_stamps_timestamps() {
        let service = service();
        let owner = IdentityId::generate();
        let item = item(owner);

        service.insert(owner, item.clone()).await.unwrap();
        let stored = service.get(owner, &item.id).await.unwrap();

        assert!(stored.created > DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(stored.created, stored.last_modified);
        assert_eq!(stored.ciphertext, item.ciphertext);
    }

    #[tokio::test]
    async fn test_insert_for_other_owner_rejected() {
        let service = service();
        let item = item(IdentityId::generate());

        let err = service.insert(IdentityId::generate(), item).await.unwrap_err();
        assert!(matches!(err, Error::Authorization(_)));
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let service = service();
        let owner = IdentityId::generate();
        let item = item(owner);

        service.insert(owner, item.clone()).await.unwrap();
        assert!(matches!(
            service.insert(owner, item).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_validation() {
        let service = service();
        let owner = IdentityId::generate();

        let mut empty = item(owner);
        empty.ciphertext.clear();
        let mut huge = item(owner);
        huge.ciphertext = vec![0u8; 257];
        let mut future = item(owner);
        future.version = ITEM_SCHEMA_VERSION + 1;

        for bad in [empty, huge, future] {
            assert!(matches!(
                service.insert(owner, bad).await,
                Err(Error::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_get_other_owner_is_hidden() {
        let service = service();
        let owner = IdentityId::generate();
        let item = item(owner);
        service.insert(owner, item.clone()).await.unwrap();

        let err = service
            .get(IdentityId::generate(), &item.id)
            .await
            .unwrap_err()
            .into_public();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_preserves_owner_and_created() {
        let service = service();
        let owner = IdentityId::generate();
        let item = item(owner);
        service.insert(owner, item.clone()).await.unwrap();
        let before = service.get(owner, &item.id).await.unwrap();

        let mut edit = before.clone();
        edit.ciphertext = vec![9u8; 32];
        edit.created = DateTime::<Utc>::UNIX_EPOCH;
        edit.favorite = true;
        service.update(owner, &item.id, edit).await.unwrap();

        let after = service.get(owner, &item.id).await.unwrap();
        assert_eq!(after.owner, owner);
        assert_eq!(after.created, before.created);
        assert!(after.last_modified > before.last_modified);
        assert!(after.favorite);
        assert_eq!(after.ciphertext, vec![9u8; 32]);
    }

    #[tokio::test]
    async fn test_update_path_body_mismatch() {
        let service = service();
        let owner = IdentityId::generate();
        let item = item(owner);
        service.insert(owner, item.clone()).await.unwrap();

        assert!(matches!(
            service.update(owner, &ItemId::generate(), item).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_by_other_owner_rejected() {
        let service = service();
        let owner = IdentityId::generate();
        let intruder = IdentityId::generate();
        let item = item(owner);
        service.insert(owner, item.clone()).await.unwrap();

        let mut hijack = item.clone();
        hijack.owner = intruder;
        assert!(service.update(intruder, &item.id, hijack).await.is_err());
        assert_eq!(service.get(owner, &item.id).await.unwrap().owner, owner);
    }

    #[tokio::test]
    async fn test_delete() {
        let service = service();
        let owner = IdentityId::generate();
        let item = item(owner);
        service.insert(owner, item.clone()).await.unwrap();

        service.delete(owner, &item.id).await.unwrap();
        assert!(matches!(
            service.get(owner, &item.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            service.delete(owner, &item.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_watermark_and_filter() {
        let service = service();
        let owner = IdentityId::generate();
        let a = item(owner);
        let b = item(owner);
        service.insert(owner, a.clone()).await.unwrap();

        let first = service.sync(owner, None).await.unwrap();
        assert_eq!(first.ids, vec![a.id]);
        assert_eq!(first.items.len(), 1);

        service.insert(owner, b.clone()).await.unwrap();
        let second = service.sync(owner, Some(first.server_time)).await.unwrap();
        assert_eq!(second.ids.len(), 2);
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id, b.id);
        assert!(second.server_time > first.server_time);

        let idle = service.sync(owner, Some(second.server_time)).await.unwrap();
        assert!(idle.items.is_empty());
    }

    #[tokio::test]
    async fn test_stamps_stay_ahead_of_rows_from_a_fast_clock() {
        let store = MemoryStore::new();
        let owner = IdentityId::generate();
        let ahead = Utc::now() + chrono::Duration::minutes(5);
        let mut row = item(owner);
        row.created = ahead;
        row.last_modified = ahead;
        ItemStore::insert(&store, row.clone()).await.unwrap();

        // A fresh service over the same store, as after a restart.
        let service = ItemService::new(
            Arc::new(store.clone()),
            Arc::new(MonotonicClock::new()),
            ServerConfig::default(),
        );

        let watermark = ahead - chrono::Duration::seconds(1);
        let response = service.sync(owner, Some(watermark)).await.unwrap();
        assert_eq!(response.items.len(), 1);
        assert!(response.server_time > ahead);

        let mut edit = row.clone();
        edit.favorite = true;
        service.update(owner, &row.id, edit).await.unwrap();
        let updated = service.get(owner, &row.id).await.unwrap();
        assert!(updated.last_modified > ahead);
        assert!(updated.last_modified > response.server_time);

        let fresh = item(owner);
        service.insert(owner, fresh.clone()).await.unwrap();
        let inserted = service.get(owner, &fresh.id).await.unwrap();
        assert!(inserted.last_modified > updated.last_modified);

        let next = service.sync(owner, Some(response.server_time)).await.unwrap();
        assert_eq!(next.items.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_seeds_clock_from_other_owners_rows() {
        let store = MemoryStore::new();
        let ahead = Utc::now() + chrono::Duration::minutes(5);
        let mut foreign = item(IdentityId::generate());
        foreign.last_modified = ahead;
        ItemStore::insert(&store, foreign).await.unwrap();

        let service = ItemService::new(
            Arc::new(store),
            Arc::new(MonotonicClock::new()),
            ServerConfig::default(),
        );
        let owner = IdentityId::generate();
        let mine = item(owner);
        service.insert(owner, mine.clone()).await.unwrap();

        assert!(service.get(owner, &mine.id).await.unwrap().last_modified > ahead);
    }

    #[tokio::test]
    async fn test_sync_is_scoped_to_owner() {
        let service = service();
        let alice = IdentityId::generate();
        let bob = IdentityId::generate();
        service.insert(alice, item(alice)).await.unwrap();

        let response = service.sync(bob, None).await.unwrap();
        assert!(response.ids.is_empty());
        assert!(response.items.is_empty());
    }
}
