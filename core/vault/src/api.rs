//! Request and response bodies exchanged with the server.
//!
//! Only derived values cross this boundary: the auth verifier, wrapped
//! keys, salts and cost parameters. The master secret and the local key
//! never appear here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyhaven_common::{IdentityId, ItemId};
use keyhaven_crypto::{AuthVerifier, IdentityPublicKey, KdfParams, Salt, WrappedKey};
use keyhaven_storage::VaultItem;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password_hint: Option<String>,
    pub salt: Salt,
    pub kdf_params: KdfParams,
    pub verifier: AuthVerifier,
    pub wrapped_vault_key: WrappedKey,
    pub wrapped_private_key: WrappedKey,
    pub public_key: IdentityPublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: IdentityId,
    pub created: DateTime<Utc>,
}

/// What a client needs before it can derive anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloginResponse {
    pub salt: Salt,
    pub kdf_params: KdfParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub email: String,
    pub verifier: AuthVerifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub identity_id: IdentityId,
    /// Bearer credential for subsequent calls.
    pub token: String,
}

/// Wrapped key material held for the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsResponse {
    pub wrapped_vault_key: WrappedKey,
    pub wrapped_private_key: WrappedKey,
    pub public_key: IdentityPublicKey,
    pub kdf_params: KdfParams,
    pub salt: Salt,
    pub last_password_change: DateTime<Utc>,
}

/// Password rotation, applied by the server as one atomic update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    /// Proof of the old secret.
    pub old_verifier: AuthVerifier,
    /// Proof of the new secret.
    pub new_verifier: AuthVerifier,
    pub new_salt: Salt,
    pub new_kdf_params: KdfParams,
    /// Same vault key, wrapped under the new local key.
    pub new_wrapped_vault_key: WrappedKey,
    /// Guard against a concurrent rotation.
    pub expected_last_password_change: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordResponse {
    pub last_password_change: DateTime<Utc>,
}

/// Incremental sync result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Every item id currently held for the owner.
    pub ids: Vec<ItemId>,
    /// Items modified strictly after the requested watermark.
    pub items: Vec<VaultItem>,
    /// Server clock read before the snapshot; the next watermark.
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResponse {
    pub id: ItemId,
}
