//! Local filesystem store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::provider::{IdentityStore, ItemStore};
use crate::records::{IdentityRecord, VaultItem};
use keyhaven_common::{Error, IdentityId, ItemId, Result};

const IDENTITIES_DIR: &str = "identities";
const ITEMS_DIR: &str = "items";

/// Local filesystem store.
///
/// Layout:
/// ```text
/// <root>/identities/<identity-id>.json
/// <root>/items/<item-id>.json
/// ```
///
/// Every write goes to a temporary file that is then renamed over the
/// target, so a reader never sees a half-written record.
pub struct LocalStore {
    root: PathBuf,
    /// Serializes read-check-write sequences (insert, CAS).
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root and its subdirectories are created if they don't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        std::fs::create_dir_all(root.join(IDENTITIES_DIR))?;
        std::fs::create_dir_all(root.join(ITEMS_DIR))?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_path(&self, id: &IdentityId) -> PathBuf {
        self.root.join(IDENTITIES_DIR).join(format!("{}.json", id))
    }

    fn item_path(&self, id: &ItemId) -> PathBuf {
        self.root.join(ITEMS_DIR).join(format!("{}.json", id))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_dir_json(&self, dir: &str) -> Result<Vec<Vec<u8>>> {
        let mut results = Vec::new();
        let mut entries = fs::read_dir(self.root.join(dir)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            results.push(fs::read(&path).await?);
        }

        Ok(results)
    }

    async fn all_identities(&self) -> Result<Vec<IdentityRecord>> {
        self.read_dir_json(IDENTITIES_DIR)
            .await?
            .iter()
            .map(|data| IdentityRecord::from_json(data))
            .collect()
    }
}

#[async_trait]
impl ItemStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, id: &ItemId) -> Result<Option<VaultItem>> {
        match Self::read_optional(&self.item_path(id)).await? {
            Some(data) => Ok(Some(VaultItem::from_json(&data)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self, owner: &IdentityId) -> Result<Vec<VaultItem>> {
        let mut items = Vec::new();
        for data in self.read_dir_json(ITEMS_DIR).await? {
            let item = VaultItem::from_json(&data)?;
            if &item.owner == owner {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn latest_modified(&self) -> Result<Option<DateTime<Utc>>> {
        let mut latest = None;
        for data in self.read_dir_json(ITEMS_DIR).await? {
            let stamp = VaultItem::from_json(&data)?.last_modified;
            latest = latest.max(Some(stamp));
        }
        Ok(latest)
    }

    async fn insert(&self, item: VaultItem) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.item_path(&item.id);

        if fs::try_exists(&path).await? {
            return Err(Error::Conflict(format!("Item already exists: {}", item.id)));
        }

        self.write_atomic(&path, &item.to_json()?).await?;
        debug!(item_id = %item.id, "Item written");
        Ok(())
    }

    async fn save(&self, item: VaultItem) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.item_path(&item.id);

        if !fs::try_exists(&path).await? {
            return Err(Error::NotFound(format!("Item not found: {}", item.id)));
        }

        self.write_atomic(&path, &item.to_json()?).await?;
        debug!(item_id = %item.id, "Item replaced");
        Ok(())
    }

    async fn delete(&self, id: &ItemId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.item_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl IdentityStore for LocalStore {
    async fn get(&self, id: &IdentityId) -> Result<Option<IdentityRecord>> {
        match Self::read_optional(&self.identity_path(id)).await? {
            Some(data) => Ok(Some(IdentityRecord::from_json(&data)?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>> {
        Ok(self
            .all_identities()
            .await?
            .into_iter()
            .find(|r| r.email == email))
    }

    async fn insert(&self, record: IdentityRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.identity_path(&record.id);

        if fs::try_exists(&path).await?
            || self
                .all_identities()
                .await?
                .iter()
                .any(|r| r.email == record.email)
        {
            return Err(Error::Conflict("Identity already registered".to_string()));
        }

        self.write_atomic(&path, &record.to_json()?).await?;
        debug!(identity_id = %record.id, "Identity written");
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        record: IdentityRecord,
        expected_last_password_change: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.identity_path(&record.id);

        let current = match Self::read_optional(&path).await? {
            Some(data) => IdentityRecord::from_json(&data)?,
            None => {
                return Err(Error::NotFound(format!(
                    "Identity not found: {}",
                    record.id
                )))
            }
        };

        if current.last_password_change != expected_last_password_change {
            return Err(Error::Conflict(
                "Password was changed concurrently".to_string(),
            ));
        }

        self.write_atomic(&path, &record.to_json()?).await?;
        debug!(identity_id = %record.id, "Identity swapped");
        Ok(())
    }
}
