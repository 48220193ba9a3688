//! Unlocked vault session.
//!
//! Sessions hold the vault key and identity keypair in memory and provide
//! item sealing and opening. Keys are zeroized when the session is locked
//! or dropped.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec;
use crate::config::ClientProfile;
use crate::item::ItemPayload;
use keyhaven_common::{Error, IdentityId, ItemId, Result, SensitiveBytes};
use keyhaven_crypto::{
    kdf, wrap, DerivedSecrets, IdentityKeyPair, IdentityPublicKey, KdfParams, Salt, VaultKey,
};
use keyhaven_storage::VaultItem;

/// Session handle for tracking active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is active and keys are available.
    Active,
    /// Session is locked, keys have been cleared.
    Locked,
}

/// Run Argon2id on the blocking pool.
///
/// Each call gets its own working memory. If `cancel` fires first the
/// result is discarded and `Validation("Key derivation cancelled")` is
/// returned; the blocking thread finishes in the background.
pub async fn derive_in_background(
    master_secret: SensitiveBytes,
    salt: Salt,
    params: KdfParams,
    cancel: &CancellationToken,
) -> Result<DerivedSecrets> {
    let task =
        tokio::task::spawn_blocking(move || kdf::derive(master_secret.as_bytes(), &salt, &params));

    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            debug!("Key derivation cancelled");
            Err(Error::Validation("Key derivation cancelled".to_string()))
        }
        joined = task => {
            joined.map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
        }
    }
}

/// Active vault session.
pub struct VaultSession {
    /// Unique session identifier.
    handle: SessionHandle,
    identity_id: IdentityId,
    public_key: IdentityPublicKey,
    /// Vault key (zeroized on drop).
    vault_key: Option<VaultKey>,
    /// Identity keypair (zeroized on drop).
    keypair: Option<IdentityKeyPair>,
    state: SessionState,
}

impl VaultSession {
    /// Unlock with the master secret.
    ///
    /// # Preconditions
    /// - Profile must hold the current wrapped key material
    ///
    /// # Postconditions
    /// - Returns active session with the decrypted vault key and keypair
    /// - Session handle is unique
    ///
    /// # Errors
    /// - `Crypto` if the master secret is wrong (vault key unwrap fails)
    /// - `Crypto` if the wrapped private key does not match the public key
    pub fn unlock(profile: &ClientProfile, master_secret: &[u8]) -> Result<Self> {
        let derived = kdf::derive(master_secret, &profile.salt, &profile.kdf_params)?;
        Self::from_derived(profile, &derived)
    }

    /// Unlock without blocking the async runtime.
    ///
    /// # Errors
    /// - Same as [`VaultSession::unlock`]
    /// - `Validation` if `cancel` fires before derivation completes
    pub async fn unlock_async(
        profile: &ClientProfile,
        master_secret: SensitiveBytes,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let derived = derive_in_background(
            master_secret,
            profile.salt.clone(),
            profile.kdf_params.clone(),
            cancel,
        )
        .await?;
        Self::from_derived(profile, &derived)
    }

    /// Unlock with already-derived secrets.
    pub fn from_derived(profile: &ClientProfile, derived: &DerivedSecrets) -> Result<Self> {
        let vault_key = wrap::unwrap_vault_key(&profile.wrapped_vault_key, &derived.local_key)?;
        let keypair = wrap::unwrap_private_key(
            &profile.wrapped_private_key,
            &vault_key,
            &profile.public_key,
        )?;

        let session = Self {
            handle: SessionHandle::new(),
            identity_id: profile.identity_id,
            public_key: profile.public_key,
            vault_key: Some(vault_key),
            keypair: Some(keypair),
            state: SessionState::Active,
        };
        info!(session = session.handle.as_str(), identity_id = %session.identity_id, "Vault unlocked");
        Ok(session)
    }

    /// Get the session handle.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Owner id items are sealed for.
    pub fn identity_id(&self) -> IdentityId {
        self.identity_id
    }

    /// Public half of the identity keypair.
    pub fn public_key(&self) -> &IdentityPublicKey {
        &self.public_key
    }

    /// Get the vault key, if session is active.
    ///
    /// # Errors
    /// - Returns error if session is locked
    pub fn vault_key(&self) -> Result<&VaultKey> {
        match self.state {
            SessionState::Active => self
                .vault_key
                .as_ref()
                .ok_or_else(|| Error::Authorization("Vault key not available".to_string())),
            SessionState::Locked => Err(Error::Authorization("Session is locked".to_string())),
        }
    }

    /// Get the identity keypair, if session is active.
    pub fn identity_keypair(&self) -> Result<&IdentityKeyPair> {
        match self.state {
            SessionState::Active => self
                .keypair
                .as_ref()
                .ok_or_else(|| Error::Authorization("Identity key not available".to_string())),
            SessionState::Locked => Err(Error::Authorization("Session is locked".to_string())),
        }
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if session is active.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Encrypt a new item owned by this identity.
    pub fn seal_item(&self, payload: &ItemPayload) -> Result<VaultItem> {
        payload.validate()?;
        codec::seal(
            payload,
            ItemId::generate(),
            self.identity_id,
            self.vault_key()?,
            Utc::now(),
        )
    }

    /// Re-encrypt an existing item with new contents.
    pub fn reseal_item(&self, item: &VaultItem, payload: &ItemPayload) -> Result<VaultItem> {
        if item.owner != self.identity_id {
            return Err(Error::Authorization(format!("Item {} is not ours", item.id)));
        }
        payload.validate()?;
        codec::reseal(item, payload, self.vault_key()?)
    }

    /// Decrypt an item.
    pub fn open_item(&self, item: &VaultItem) -> Result<ItemPayload> {
        codec::open(item, self.vault_key()?)
    }

    /// Lock the session, clearing all keys from memory.
    ///
    /// # Postconditions
    /// - Vault key and keypair are zeroized and removed
    /// - Session state is Locked
    pub fn lock(&mut self) {
        // ZeroizeOnDrop / StaticSecret zeroize on drop
        self.vault_key.take();
        self.keypair.take();
        if self.state == SessionState::Active {
            debug!(session = self.handle.as_str(), "Vault locked");
        }
        self.state = SessionState::Locked;
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RegisterResponse;
    use crate::identity::Registration;
    use crate::item::SecureNoteData;
    use crate::test_support::fast_params;

    fn profile(secret: &[u8]) -> ClientProfile {
        let registration =
            Registration::create("a@example.com", secret, None, fast_params()).unwrap();
        let response = RegisterResponse {
            id: IdentityId::generate(),
            created: Utc::now(),
        };
        ClientProfile::from_registration(registration.request(), &response)
    }

    fn note() -> ItemPayload {
        ItemPayload::SecureNote(SecureNoteData {
            title: "door".to_string(),
            note: "1234".to_string(),
        })
    }

    #[test]
    fn test_session_creation() {
        let session = VaultSession::unlock(&profile(b"pw"), b"pw").unwrap();
        assert!(session.is_active());
        assert!(session.vault_key().is_ok());
        assert!(session.identity_keypair().is_ok());
    }

    #[test]
    fn test_session_lock() {
        let mut session = VaultSession::unlock(&profile(b"pw"), b"pw").unwrap();
        session.lock();

        assert!(!session.is_active());
        assert_eq!(session.state(), SessionState::Locked);
        assert!(session.vault_key().is_err());
        assert!(session.open_item(&session_item()).is_err());
    }

    fn session_item() -> VaultItem {
        let session = VaultSession::unlock(&profile(b"x"), b"x").unwrap();
        session.seal_item(&note()).unwrap()
    }

    #[test]
    fn test_wrong_password_fails() {
        let result = VaultSession::unlock(&profile(b"correct"), b"wrong");
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_seal_open_item() {
        let profile = profile(b"pw");
        let session = VaultSession::unlock(&profile, b"pw").unwrap();

        let item = session.seal_item(&note()).unwrap();
        assert_eq!(item.owner, profile.identity_id);

        // a second unlock recovers the same vault key
        let again = VaultSession::unlock(&profile, b"pw").unwrap();
        assert_eq!(again.open_item(&item).unwrap(), note());
    }

    #[test]
    fn test_reseal_foreign_item_rejected() {
        let session = VaultSession::unlock(&profile(b"pw"), b"pw").unwrap();
        let foreign = session_item();

        assert!(matches!(
            session.reseal_item(&foreign, &note()),
            Err(Error::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_async() {
        let profile = profile(b"pw");
        let cancel = CancellationToken::new();

        let session =
            VaultSession::unlock_async(&profile, SensitiveBytes::new(b"pw".to_vec()), &cancel)
                .await
                .unwrap();
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_unlock_async_cancelled() {
        let profile = profile(b"pw");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            VaultSession::unlock_async(&profile, SensitiveBytes::new(b"pw".to_vec()), &cancel)
                .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
