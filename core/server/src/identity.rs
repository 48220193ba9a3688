//! Identity endpoints: registration, prelogin, authentication and
//! password rotation.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::SessionResolver;
use crate::clock::MonotonicClock;
use crate::config::ServerConfig;
use keyhaven_common::{Error, IdentityId, Result};
use keyhaven_crypto::{IdentityPublicKey, KeyPurpose, Salt, WrappedKey};
use keyhaven_storage::{IdentityRecord, IdentityStore};
use keyhaven_vault::api::{
    AuthenticateRequest, AuthenticateResponse, ChangePasswordRequest, ChangePasswordResponse,
    PreloginResponse, RegisterRequest, RegisterResponse, SecretsResponse,
};
use keyhaven_vault::normalize_email;

/// Server-side identity operations.
///
/// The service only ever handles verifiers (reduced to digests before
/// storage) and wrapped keys. Nothing it holds can decrypt an item.
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionResolver>,
    clock: Arc<MonotonicClock>,
    config: ServerConfig,
    prelogin_secret: [u8; 32],
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionResolver>,
        clock: Arc<MonotonicClock>,
        config: ServerConfig,
        prelogin_secret: [u8; 32],
    ) -> Self {
        Self {
            store,
            sessions,
            clock,
            config,
            prelogin_secret,
        }
    }

    /// Create an identity.
    ///
    /// # Errors
    /// - `Validation` for a bad email, oversized hint, invalid params or
    ///   mislabeled wrapped keys
    /// - `Conflict` if the email is already registered
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        let email = normalize_email(&request.email)?;
        if let Some(hint) = &request.password_hint {
            if hint.chars().count() > self.config.max_hint_length {
                return Err(Error::Validation("Password hint too long".to_string()));
            }
        }
        request.kdf_params.validate()?;
        check_purpose(&request.wrapped_vault_key, KeyPurpose::VaultKey)?;
        check_purpose(&request.wrapped_private_key, KeyPurpose::IdentityPrivateKey)?;

        let now = self.clock.now();
        let record = IdentityRecord {
            id: IdentityId::generate(),
            email,
            password_hint: request.password_hint,
            kdf_params: request.kdf_params,
            salt: request.salt,
            verifier_digest: request.verifier.digest(),
            wrapped_vault_key: request.wrapped_vault_key,
            wrapped_private_key: request.wrapped_private_key,
            public_key: request.public_key,
            created: now,
            last_password_change: now,
            last_modified: now,
        };
        let id = record.id;
        self.store.insert(record).await?;

        info!(identity_id = %id, "Identity registered");
        Ok(RegisterResponse { id, created: now })
    }

    /// Salt and cost parameters for an email.
    ///
    /// Unknown emails get a stable made-up salt and the default params, so
    /// the answer does not reveal whether the email is registered.
    pub async fn prelogin(&self, email: &str) -> Result<PreloginResponse> {
        let email = normalize_email(email)?;
        match self.store.find_by_email(&email).await? {
            Some(record) => Ok(PreloginResponse {
                salt: record.salt,
                kdf_params: record.kdf_params,
            }),
            None => Ok(PreloginResponse {
                salt: self.decoy_salt(&email),
                kdf_params: self.config.default_kdf_params.clone(),
            }),
        }
    }

    /// Check a verifier and issue a bearer credential.
    ///
    /// # Errors
    /// - `Authentication` for an unknown email or a wrong verifier; the two
    ///   are indistinguishable
    pub async fn authenticate(&self, request: AuthenticateRequest) -> Result<AuthenticateResponse> {
        let email = normalize_email(&request.email).map_err(|_| Error::Authentication)?;
        let record = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(Error::Authentication)?;

        if !record.verifier_digest.matches(&request.verifier) {
            warn!(identity_id = %record.id, "Rejected verifier");
            return Err(Error::Authentication);
        }

        let token = self.sessions.issue(record.id).await?;
        debug!(identity_id = %record.id, "Authenticated");
        Ok(AuthenticateResponse {
            identity_id: record.id,
            token,
        })
    }

    /// Wrapped key material of the caller.
    pub async fn secrets(&self, identity: IdentityId) -> Result<SecretsResponse> {
        let record = self.load(identity).await?;
        Ok(SecretsResponse {
            wrapped_vault_key: record.wrapped_vault_key,
            wrapped_private_key: record.wrapped_private_key,
            public_key: record.public_key,
            kdf_params: record.kdf_params,
            salt: record.salt,
            last_password_change: record.last_password_change,
        })
    }

    /// Public key of any identity.
    pub async fn public_key(&self, identity: IdentityId) -> Result<IdentityPublicKey> {
        Ok(self.load(identity).await?.public_key)
    }

    /// Swap the verifier, salt, params and wrapped vault key in one write.
    ///
    /// # Postconditions
    /// - The old verifier stops authenticating and the new one starts
    /// - Every outstanding credential of the identity is revoked
    /// - Items and the wrapped private key are untouched
    ///
    /// # Errors
    /// - `Authentication` if the old verifier does not match
    /// - `Conflict` if `expected_last_password_change` is stale
    /// - `Validation` for invalid params or a mislabeled wrapped key
    pub async fn change_password(
        &self,
        identity: IdentityId,
        request: ChangePasswordRequest,
    ) -> Result<ChangePasswordResponse> {
        let current = self.load(identity).await?;
        if !current.verifier_digest.matches(&request.old_verifier) {
            warn!(identity_id = %identity, "Rejected old verifier on password change");
            return Err(Error::Authentication);
        }
        if current.last_password_change != request.expected_last_password_change {
            return Err(Error::Conflict("Password changed concurrently".to_string()));
        }
        request.new_kdf_params.validate()?;
        check_purpose(&request.new_wrapped_vault_key, KeyPurpose::VaultKey)?;

        let now = self.clock.now();
        let updated = IdentityRecord {
            kdf_params: request.new_kdf_params,
            salt: request.new_salt,
            verifier_digest: request.new_verifier.digest(),
            wrapped_vault_key: request.new_wrapped_vault_key,
            last_password_change: now,
            last_modified: now,
            ..current
        };
        self.store
            .compare_and_swap(updated, request.expected_last_password_change)
            .await?;
        self.sessions.revoke_all(identity).await?;

        info!(identity_id = %identity, "Password changed");
        Ok(ChangePasswordResponse {
            last_password_change: now,
        })
    }

    async fn load(&self, identity: IdentityId) -> Result<IdentityRecord> {
        self.store
            .get(&identity)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Identity {}", identity)))
    }

    fn decoy_salt(&self, email: &str) -> Salt {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(b"keyhaven/prelogin-decoy/v1");
        hasher.update(self.prelogin_secret);
        hasher.update(email.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Salt::from_bytes(out)
    }
}

fn check_purpose(wrapped: &WrappedKey, expected: KeyPurpose) -> Result<()> {
    if wrapped.purpose != expected {
        return Err(Error::Validation(format!(
            "Wrapped key has purpose {:?}, expected {:?}",
            wrapped.purpose, expected
        )));
    }
    Ok(())
}
