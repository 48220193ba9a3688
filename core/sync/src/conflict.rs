//! Conflict reporting.
//!
//! Merges are last-writer-wins: the server copy always replaces the local
//! one. When that discards an unpushed local change, the reconciler records
//! a [`ConflictInfo`] so callers can surface it or build a richer merge on
//! top.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ReplicaEntry, SyncStatus};
use keyhaven_common::ItemId;
use keyhaven_storage::VaultItem;

/// What happened on the server to an item with local changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Server holds a newer version; it replaced the local edit.
    RemoteModified,
    /// Server no longer has the item; the local edit was dropped.
    RemoteDeleted,
}

/// Information about a detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub item_id: ItemId,
    pub kind: ConflictKind,
    /// Local status that was overridden.
    pub local_status: SyncStatus,
    /// Local (provisional) modification time.
    pub local_modified: DateTime<Utc>,
    /// Server modification time, if the item still exists.
    pub remote_modified: Option<DateTime<Utc>>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    /// Local entry replaced by a newer server version.
    pub fn remote_modified(local: &ReplicaEntry, remote: &VaultItem) -> Self {
        Self {
            item_id: local.item.id,
            kind: ConflictKind::RemoteModified,
            local_status: local.status,
            local_modified: local.item.last_modified,
            remote_modified: Some(remote.last_modified),
            detected_at: Utc::now(),
        }
    }

    /// Local entry whose server copy is gone.
    pub fn remote_deleted(local: &ReplicaEntry) -> Self {
        Self {
            item_id: local.item.id,
            kind: ConflictKind::RemoteDeleted,
            local_status: local.status,
            local_modified: local.item.last_modified,
            remote_modified: None,
            detected_at: Utc::now(),
        }
    }
}
