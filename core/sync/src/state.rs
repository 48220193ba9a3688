//! Local replica of an identity's encrypted items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use keyhaven_common::{Error, ItemId, Result};
use keyhaven_storage::VaultItem;

/// Sync status for a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Matches the server version last merged.
    Synced,
    /// Created locally, not yet on the server.
    LocalCreated,
    /// Edited locally, not yet pushed.
    LocalModified,
    /// Deleted locally, not yet pushed.
    LocalDeleted,
}

impl SyncStatus {
    /// Whether the entry holds an unpushed local change.
    pub fn is_pending(self) -> bool {
        self != SyncStatus::Synced
    }
}

/// One replicated item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaEntry {
    pub item: VaultItem,
    pub status: SyncStatus,
}

/// Client-side copy of the item collection plus the sync watermark.
///
/// Holds ciphertext only; decryption happens in the vault session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalReplica {
    entries: HashMap<ItemId, ReplicaEntry>,
    /// Server time of the last successful merge.
    watermark: Option<DateTime<Utc>>,
}

impl LocalReplica {
    /// Create an empty replica with no watermark.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point up to which server changes have been merged.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub(crate) fn set_watermark(&mut self, watermark: DateTime<Utc>) {
        self.watermark = Some(watermark);
    }

    /// Forget the watermark so the next sync fetches everything.
    pub fn reset_watermark(&mut self) {
        self.watermark = None;
    }

    /// Get an entry, including locally deleted ones.
    pub fn entry(&self, id: &ItemId) -> Option<&ReplicaEntry> {
        self.entries.get(id)
    }

    /// Get a visible item.
    pub fn get(&self, id: &ItemId) -> Option<&VaultItem> {
        self.entries
            .get(id)
            .filter(|e| e.status != SyncStatus::LocalDeleted)
            .map(|e| &e.item)
    }

    /// Visible items, ordered by id.
    pub fn items(&self) -> Vec<&VaultItem> {
        let mut items: Vec<&VaultItem> = self
            .entries
            .values()
            .filter(|e| e.status != SyncStatus::LocalDeleted)
            .map(|e| &e.item)
            .collect();
        items.sort_by_key(|item| item.id);
        items
    }

    /// Every id held, including locally deleted ones.
    pub fn ids(&self) -> Vec<ItemId> {
        self.entries.keys().copied().collect()
    }

    /// Entries with unpushed local changes.
    pub fn pending(&self) -> Vec<ReplicaEntry> {
        self.entries
            .values()
            .filter(|e| e.status.is_pending())
            .cloned()
            .collect()
    }

    /// Number of entries (including locally deleted ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a locally created item.
    ///
    /// # Errors
    /// - `Conflict` if the id is already held
    pub fn stage_create(&mut self, item: VaultItem) -> Result<()> {
        if self.entries.contains_key(&item.id) {
            return Err(Error::Conflict(format!("Item already exists: {}", item.id)));
        }
        self.entries.insert(
            item.id,
            ReplicaEntry {
                item,
                status: SyncStatus::LocalCreated,
            },
        );
        Ok(())
    }

    /// Record a local edit.
    ///
    /// An edit of a not-yet-pushed item stays a creation.
    pub fn stage_update(&mut self, item: VaultItem) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&item.id)
            .filter(|e| e.status != SyncStatus::LocalDeleted)
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", item.id)))?;

        if entry.status != SyncStatus::LocalCreated {
            entry.status = SyncStatus::LocalModified;
        }
        entry.item = item;
        Ok(())
    }

    /// Record a local deletion.
    ///
    /// A never-pushed item is dropped outright.
    pub fn stage_delete(&mut self, id: &ItemId) -> Result<()> {
        match self.entries.get(id).map(|e| e.status) {
            None | Some(SyncStatus::LocalDeleted) => {
                Err(Error::NotFound(format!("Item not found: {}", id)))
            }
            Some(SyncStatus::LocalCreated) => {
                self.entries.remove(id);
                Ok(())
            }
            Some(_) => {
                self.mark(id, SyncStatus::LocalDeleted);
                Ok(())
            }
        }
    }

    /// Store the server version of an item. Returns the replaced entry.
    pub(crate) fn put_synced(&mut self, item: VaultItem) -> Option<ReplicaEntry> {
        self.entries.insert(
            item.id,
            ReplicaEntry {
                item,
                status: SyncStatus::Synced,
            },
        )
    }

    /// Mark an entry as pushed.
    pub(crate) fn mark_synced(&mut self, id: &ItemId) {
        self.mark(id, SyncStatus::Synced);
    }

    fn mark(&mut self, id: &ItemId, status: SyncStatus) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.status = status;
        }
    }

    pub(crate) fn remove(&mut self, id: &ItemId) -> Option<ReplicaEntry> {
        self.entries.remove(id)
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Load from a file; a missing file is an empty replica.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(data) => Self::from_json(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a file, replacing it atomically.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, self.to_json()?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
