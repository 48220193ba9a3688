//! Incremental sync and last-writer-wins merge.
//!
//! The server is authoritative. Each round asks for every id the owner
//! currently holds plus the items changed since the watermark, then:
//!
//! 1. changed items overwrite the local copy wholesale
//! 2. ids present but unchanged are left alone
//! 3. local ids missing from the server set are deleted locally
//! 4. the watermark moves to the server-reported time
//!
//! A failed round leaves the watermark where it was, so re-running it
//! reproduces the same change set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::conflict::ConflictInfo;
use crate::remote::SyncRemote;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::state::{LocalReplica, SyncStatus};
use keyhaven_common::{Error, ItemId, Result};
use keyhaven_storage::VaultItem;
use keyhaven_vault::api::SyncResponse;

/// Sync configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Backoff for remote calls.
    pub retry: RetryConfig,
}

impl SyncConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Items new to the replica.
    pub created: usize,
    /// Local copies overwritten by the server version.
    pub updated: usize,
    /// Local copies removed because the server no longer has them.
    pub deleted: usize,
    /// Ids present on both sides with nothing to do.
    pub unchanged: usize,
    /// Local changes discarded by server-wins.
    pub conflicts: Vec<ConflictInfo>,
    /// Watermark after the merge.
    pub watermark: Option<DateTime<Utc>>,
}

/// Result of pushing local changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Local edits whose item was deleted on the server meanwhile.
    pub conflicts: Vec<ConflictInfo>,
}

/// Apply a sync response to the replica.
///
/// Deterministic given the same replica and response. Unpushed local
/// creations are kept since the server cannot know about them yet.
pub fn merge(replica: &mut LocalReplica, response: SyncResponse) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let all: HashSet<ItemId> = response.ids.iter().copied().collect();
    let mut changed: HashMap<ItemId, VaultItem> = HashMap::new();

    for item in response.items {
        if all.contains(&item.id) {
            changed.insert(item.id, item);
        } else {
            // deleted again after it was read
            debug!(item_id = %item.id, "Ignoring changed item absent from id set");
        }
    }

    for id in &all {
        match changed.remove(id) {
            Some(remote) => {
                if let Some(local) = replica.entry(id) {
                    if local.status.is_pending() {
                        outcome
                            .conflicts
                            .push(ConflictInfo::remote_modified(local, &remote));
                    }
                }
                match replica.put_synced(remote) {
                    Some(_) => outcome.updated += 1,
                    None => outcome.created += 1,
                }
            }
            None => {
                if replica.entry(id).is_some() {
                    outcome.unchanged += 1;
                }
            }
        }
    }

    for id in replica.ids() {
        if all.contains(&id) {
            continue;
        }
        let Some(local) = replica.entry(&id) else {
            continue;
        };
        match local.status {
            SyncStatus::LocalCreated => {}
            SyncStatus::LocalModified => {
                outcome.conflicts.push(ConflictInfo::remote_deleted(local));
                replica.remove(&id);
                outcome.deleted += 1;
            }
            SyncStatus::Synced | SyncStatus::LocalDeleted => {
                replica.remove(&id);
                outcome.deleted += 1;
            }
        }
    }

    replica.set_watermark(response.server_time);
    outcome.watermark = replica.watermark();
    outcome
}

/// Drives sync rounds against a remote.
pub struct SyncReconciler<R: SyncRemote> {
    remote: R,
    config: SyncConfig,
    executor: RetryExecutor,
}

impl<R: SyncRemote> SyncReconciler<R> {
    pub fn new(remote: R, config: SyncConfig) -> Self {
        let executor = RetryExecutor::new(config.retry.clone());
        Self {
            remote,
            config,
            executor,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Ask the server for the id set and items changed after `since`.
    pub async fn incremental_sync(&self, since: Option<DateTime<Utc>>) -> Result<SyncResponse> {
        self.executor
            .execute("sync", || self.remote.sync(since))
            .await
    }

    /// Rebuild the replica from the server's full item set.
    ///
    /// Used for first sync or after local state was lost. Unpushed local
    /// creations survive; everything else is replaced.
    pub async fn fetch_all(&self, replica: &mut LocalReplica) -> Result<MergeOutcome> {
        let response = self.incremental_sync(None).await?;
        let outcome = merge(replica, response);
        info!(
            items = replica.items().len(),
            "Full fetch complete"
        );
        Ok(outcome)
    }

    /// One incremental round from the replica's watermark.
    pub async fn sync(&self, replica: &mut LocalReplica) -> Result<MergeOutcome> {
        let since = replica.watermark();
        if since.is_none() {
            return self.fetch_all(replica).await;
        }

        let response = self.incremental_sync(since).await?;
        let changed = response.items.len();
        let outcome = merge(replica, response);

        info!(
            changed,
            created = outcome.created,
            updated = outcome.updated,
            deleted = outcome.deleted,
            conflicts = outcome.conflicts.len(),
            "Sync complete"
        );
        Ok(outcome)
    }

    /// Upload every pending local change.
    ///
    /// Each change is marked synced as soon as the server accepts it, so a
    /// failure part way through only leaves the remaining changes pending.
    /// The next [`SyncReconciler::sync`] pulls the server-stamped versions.
    ///
    /// # Errors
    /// - The first non-recoverable error from the remote
    pub async fn push_pending(&self, replica: &mut LocalReplica) -> Result<PushOutcome> {
        let mut outcome = PushOutcome::default();

        for entry in replica.pending() {
            let id = entry.item.id;
            match entry.status {
                SyncStatus::LocalCreated => {
                    match self
                        .executor
                        .execute("insert", || self.remote.insert(&entry.item))
                        .await
                    {
                        // an earlier attempt may have landed before its response was lost
                        Ok(_) | Err(Error::Conflict(_)) => {}
                        Err(e) => return Err(e),
                    }
                    replica.mark_synced(&id);
                    outcome.inserted += 1;
                }
                SyncStatus::LocalModified => {
                    match self
                        .executor
                        .execute("update", || self.remote.update(&entry.item))
                        .await
                    {
                        Ok(_) => {
                            replica.mark_synced(&id);
                            outcome.updated += 1;
                        }
                        Err(Error::NotFound(_)) => {
                            warn!(item_id = %id, "Edited item was deleted on the server");
                            outcome.conflicts.push(ConflictInfo::remote_deleted(&entry));
                            replica.remove(&id);
                        }
                        Err(e) => return Err(e),
                    }
                }
                SyncStatus::LocalDeleted => {
                    match self
                        .executor
                        .execute("delete", || self.remote.delete(&id))
                        .await
                    {
                        Ok(_) | Err(Error::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                    replica.remove(&id);
                    outcome.deleted += 1;
                }
                SyncStatus::Synced => {}
            }
        }

        debug!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            deleted = outcome.deleted,
            "Pushed local changes"
        );
        Ok(outcome)
    }

    /// Push local changes, then pull.
    pub async fn synchronize(&self, replica: &mut LocalReplica) -> Result<(PushOutcome, MergeOutcome)> {
        let pushed = self.push_pending(replica).await?;
        let mut merged = self.sync(replica).await?;
        merged.conflicts.extend(pushed.conflicts.iter().cloned());
        Ok((pushed, merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictKind;
    use crate::test_support::{item, FakeRemote};
    use chrono::Duration;
    use keyhaven_common::IdentityId;

    fn response(items: Vec<VaultItem>, extra_ids: &[ItemId], at: DateTime<Utc>) -> SyncResponse {
        let mut ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        ids.extend_from_slice(extra_ids);
        SyncResponse {
            ids,
            items,
            server_time: at,
        }
    }

    #[test]
    fn test_merge_creates_and_advances_watermark() {
        let mut replica = LocalReplica::new();
        let a = item(IdentityId::generate());
        let t = Utc::now();

        let outcome = merge(&mut replica, response(vec![a.clone()], &[], t));

        assert_eq!(outcome.created, 1);
        assert_eq!(replica.get(&a.id), Some(&a));
        assert_eq!(replica.watermark(), Some(t));
    }

    #[test]
    fn test_merge_overwrites_changed() {
        let mut replica = LocalReplica::new();
        let mut a = item(IdentityId::generate());
        replica.put_synced(a.clone());
        a.ciphertext = vec![9; 48];

        let outcome = merge(&mut replica, response(vec![a.clone()], &[], Utc::now()));

        assert_eq!(outcome.updated, 1);
        assert_eq!(replica.get(&a.id).unwrap().ciphertext, vec![9; 48]);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_merge_leaves_unchanged() {
        let mut replica = LocalReplica::new();
        let a = item(IdentityId::generate());
        replica.put_synced(a.clone());

        let outcome = merge(&mut replica, response(vec![], &[a.id], Utc::now()));

        assert_eq!(outcome.unchanged, 1);
        assert_eq!(replica.get(&a.id), Some(&a));
    }

    #[test]
    fn test_merge_deletes_missing() {
        let mut replica = LocalReplica::new();
        let a = item(IdentityId::generate());
        replica.put_synced(a.clone());

        let outcome = merge(&mut replica, response(vec![], &[], Utc::now()));

        assert_eq!(outcome.deleted, 1);
        assert!(replica.is_empty());
    }

    #[test]
    fn test_merge_keeps_unpushed_creations() {
        let mut replica = LocalReplica::new();
        let a = item(IdentityId::generate());
        replica.stage_create(a.clone()).unwrap();

        merge(&mut replica, response(vec![], &[], Utc::now()));

        assert!(replica.get(&a.id).is_some());
    }

    #[test]
    fn test_merge_reports_overwritten_local_edit() {
        let mut replica = LocalReplica::new();
        let a = item(IdentityId::generate());
        replica.put_synced(a.clone());
        let mut edited = a.clone();
        edited.favorite = true;
        replica.stage_update(edited).unwrap();

        let outcome = merge(&mut replica, response(vec![a.clone()], &[], Utc::now()));

        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].kind, ConflictKind::RemoteModified);
        assert!(!replica.get(&a.id).unwrap().favorite);
        assert!(replica.pending().is_empty());
    }

    #[test]
    fn test_merge_reports_deleted_local_edit() {
        let mut replica = LocalReplica::new();
        let a = item(IdentityId::generate());
        replica.put_synced(a.clone());
        replica.stage_update(a.clone()).unwrap();

        let outcome = merge(&mut replica, response(vec![], &[], Utc::now()));

        assert_eq!(outcome.conflicts[0].kind, ConflictKind::RemoteDeleted);
        assert!(replica.is_empty());
    }

    #[test]
    fn test_changed_item_outside_id_set_ignored() {
        let mut replica = LocalReplica::new();
        let a = item(IdentityId::generate());
        let resp = SyncResponse {
            ids: vec![],
            items: vec![a.clone()],
            server_time: Utc::now(),
        };

        merge(&mut replica, resp);

        assert!(replica.get(&a.id).is_none());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let owner = IdentityId::generate();
        let (a, b) = (item(owner), item(owner));
        let resp = response(vec![a, b], &[], Utc::now());

        let mut once = LocalReplica::new();
        merge(&mut once, resp.clone());
        let mut twice = once.clone();
        merge(&mut twice, resp);

        assert_eq!(once.items(), twice.items());
        assert_eq!(once.watermark(), twice.watermark());
    }

    #[tokio::test]
    async fn test_sync_uses_watermark() {
        let owner = IdentityId::generate();
        let remote = FakeRemote::new(owner);
        let t0 = Utc::now();
        remote.put(item(owner), t0);

        let reconciler = SyncReconciler::new(remote, SyncConfig::default());
        let mut replica = LocalReplica::new();

        let first = reconciler.sync(&mut replica).await.unwrap();
        assert_eq!(first.created, 1);

        let second = reconciler.sync(&mut replica).await.unwrap();
        assert_eq!(second.created + second.updated, 0);
        assert_eq!(second.unchanged, 1);
    }

    #[tokio::test]
    async fn test_reset_watermark_refetches_everything() {
        let owner = IdentityId::generate();
        let remote = FakeRemote::new(owner);
        let t0 = Utc::now();
        remote.put(item(owner), t0);

        let reconciler = SyncReconciler::new(remote, SyncConfig::default());
        let mut replica = LocalReplica::new();
        reconciler.sync(&mut replica).await.unwrap();

        // Stamped behind the watermark, so an incremental round skips it.
        let stale = item(owner);
        reconciler
            .remote()
            .put(stale.clone(), t0 - Duration::seconds(60));
        reconciler.sync(&mut replica).await.unwrap();
        assert!(replica.get(&stale.id).is_none());

        replica.reset_watermark();
        let full = reconciler.sync(&mut replica).await.unwrap();
        assert_eq!(full.created, 1);
        assert_eq!(full.updated, 1);
        assert!(replica.get(&stale.id).is_some());
        assert!(replica.watermark().is_some());
    }

    #[tokio::test]
    async fn test_incremental_sync_repeatable() {
        let owner = IdentityId::generate();
        let remote = FakeRemote::new(owner);
        let t0 = Utc::now();
        remote.put(item(owner), t0 + Duration::seconds(1));
        let reconciler = SyncReconciler::new(remote, SyncConfig::default());

        let a = reconciler.incremental_sync(Some(t0)).await.unwrap();
        let b = reconciler.incremental_sync(Some(t0)).await.unwrap();

        assert_eq!(a.items, b.items);
        assert_eq!(a.ids, b.ids);
    }

    #[tokio::test]
    async fn test_push_pending() {
        let owner = IdentityId::generate();
        let remote = FakeRemote::new(owner);
        let existing = item(owner);
        remote.put(existing.clone(), Utc::now());
        let gone = item(owner);

        let reconciler = SyncReconciler::new(remote, SyncConfig::default());
        let mut replica = LocalReplica::new();
        reconciler.sync(&mut replica).await.unwrap();

        let new = item(owner);
        replica.stage_create(new.clone()).unwrap();
        replica.stage_delete(&existing.id).unwrap();
        replica.put_synced(gone.clone());
        replica.stage_update(gone.clone()).unwrap();

        let pushed = reconciler.push_pending(&mut replica).await.unwrap();

        assert_eq!(pushed.inserted, 1);
        assert_eq!(pushed.deleted, 1);
        assert_eq!(pushed.conflicts.len(), 1);
        assert!(replica.pending().is_empty());
        assert!(reconciler.remote().contains(&new.id));
        assert!(!reconciler.remote().contains(&existing.id));
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_watermark() {
        let owner = IdentityId::generate();
        let remote = FakeRemote::new(owner);
        remote.fail_next(5);
        let config = SyncConfig::default().with_retry(RetryConfig::none());
        let reconciler = SyncReconciler::new(remote, config);
        let mut replica = LocalReplica::new();

        let result = reconciler.sync(&mut replica).await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert!(replica.watermark().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let owner = IdentityId::generate();
        let remote = FakeRemote::new(owner);
        remote.put(item(owner), Utc::now());
        remote.fail_next(1);
        let config = SyncConfig::default().with_retry(
            RetryConfig::new(2)
                .with_initial_delay(std::time::Duration::from_millis(1))
                .with_jitter(false),
        );
        let reconciler = SyncReconciler::new(remote, config);
        let mut replica = LocalReplica::new();

        let outcome = reconciler.sync(&mut replica).await.unwrap();
        assert_eq!(outcome.created, 1);
    }
}
