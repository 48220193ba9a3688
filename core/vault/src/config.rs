//! Client-side profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::api::{RegisterRequest, RegisterResponse, SecretsResponse};
use keyhaven_common::{IdentityId, Result};
use keyhaven_crypto::{IdentityPublicKey, KdfParams, Salt, WrappedKey};

/// Everything a client keeps between runs to unlock offline.
///
/// Holds only wrapped key material; no secret in here is usable without
/// the master secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientProfile {
    pub identity_id: IdentityId,
    pub email: String,
    pub salt: Salt,
    pub kdf_params: KdfParams,
    pub wrapped_vault_key: WrappedKey,
    pub wrapped_private_key: WrappedKey,
    pub public_key: IdentityPublicKey,
    /// Compare-and-swap guard for the next password rotation.
    pub last_password_change: DateTime<Utc>,
}

impl ClientProfile {
    /// Build the profile for a freshly registered identity.
    pub fn from_registration(request: &RegisterRequest, response: &RegisterResponse) -> Self {
        Self {
            identity_id: response.id,
            email: request.email.clone(),
            salt: request.salt.clone(),
            kdf_params: request.kdf_params.clone(),
            wrapped_vault_key: request.wrapped_vault_key.clone(),
            wrapped_private_key: request.wrapped_private_key.clone(),
            public_key: request.public_key,
            last_password_change: response.created,
        }
    }

    /// Replace cached key material with what the server holds.
    pub fn apply_secrets(&mut self, secrets: SecretsResponse) {
        self.salt = secrets.salt;
        self.kdf_params = secrets.kdf_params;
        self.wrapped_vault_key = secrets.wrapped_vault_key;
        self.wrapped_private_key = secrets.wrapped_private_key;
        self.public_key = secrets.public_key;
        self.last_password_change = secrets.last_password_change;
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Load from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read(path)?)
    }

    /// Write to a file, replacing it atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
