//! In-memory store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::provider::{IdentityStore, ItemStore};
use crate::records::{IdentityRecord, VaultItem};
use keyhaven_common::{Error, IdentityId, ItemId, Result};

/// In-memory identity and item store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same underlying maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    identities: Arc<RwLock<HashMap<IdentityId, IdentityRecord>>>,
    items: Arc<RwLock<HashMap<ItemId, VaultItem>>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items held, across all owners.
    pub fn item_count(&self) -> Result<usize> {
        Ok(read(&self.items)?.len())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &ItemId) -> Result<Option<VaultItem>> {
        Ok(read(&self.items)?.get(id).cloned())
    }

    async fn get_all(&self, owner: &IdentityId) -> Result<Vec<VaultItem>> {
        let items = read(&self.items)?;
        Ok(items
            .values()
            .filter(|item| &item.owner == owner)
            .cloned()
            .collect())
    }

    async fn latest_modified(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(read(&self.items)?
            .values()
            .map(|item| item.last_modified)
            .max())
    }

    async fn insert(&self, item: VaultItem) -> Result<()> {
        let mut items = write(&self.items)?;
        if items.contains_key(&item.id) {
            return Err(Error::Conflict(format!("Item already exists: {}", item.id)));
        }
        items.insert(item.id, item);
        Ok(())
    }

    async fn save(&self, item: VaultItem) -> Result<()> {
        let mut items = write(&self.items)?;
        match items.get_mut(&item.id) {
            Some(slot) => {
                *slot = item;
                Ok(())
            }
            None => Err(Error::NotFound(format!("Item not found: {}", item.id))),
        }
    }

    async fn delete(&self, id: &ItemId) -> Result<bool> {
        Ok(write(&self.items)?.remove(id).is_some())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get(&self, id: &IdentityId) -> Result<Option<IdentityRecord>> {
        Ok(read(&self.identities)?.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>> {
        let identities = read(&self.identities)?;
        Ok(identities.values().find(|r| r.email == email).cloned())
    }

    async fn insert(&self, record: IdentityRecord) -> Result<()> {
        let mut identities = write(&self.identities)?;
        if identities.contains_key(&record.id)
            || identities.values().any(|r| r.email == record.email)
        {
            return Err(Error::Conflict("Identity already registered".to_string()));
        }
        identities.insert(record.id, record);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        record: IdentityRecord,
        expected_last_password_change: DateTime<Utc>,
    ) -> Result<()> {
        let mut identities = write(&self.identities)?;
        let current = identities
            .get_mut(&record.id)
            .ok_or_else(|| Error::NotFound(format!("Identity not found: {}", record.id)))?;

        if current.last_password_change != expected_last_password_change {
            return Err(Error::Conflict(
                "Password was changed concurrently".to_string(),
            ));
        }

        *current = record;
        Ok(())
    }
}
