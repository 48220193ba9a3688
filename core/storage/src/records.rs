//! Durable record shapes.
//!
//! Everything in here is opaque to the server: the only plaintext fields
//! are ids, timestamps, flags and the public key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use keyhaven_common::encoding::b64;
use keyhaven_common::{Error, IdentityId, ItemId, Result};
use keyhaven_crypto::{IdentityPublicKey, KdfParams, Salt, VerifierDigest, WrappedKey};

/// Current item schema version.
pub const ITEM_SCHEMA_VERSION: u32 = 1;

/// One per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: IdentityId,
    /// Normalized (trimmed, lowercase).
    pub email: String,
    /// Advisory only; stored unencrypted.
    pub password_hint: Option<String>,
    pub kdf_params: KdfParams,
    pub salt: Salt,
    /// Digest of the auth verifier. The verifier itself is not stored.
    pub verifier_digest: VerifierDigest,
    /// Vault key under the local key.
    pub wrapped_vault_key: WrappedKey,
    /// Identity private key under the vault key.
    pub wrapped_private_key: WrappedKey,
    pub public_key: IdentityPublicKey,
    pub created: DateTime<Utc>,
    pub last_password_change: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Closed set of item variants.
///
/// Serialized as its numeric tag; unknown tags are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ItemType {
    Login,
    SecureNote,
    Card,
}

impl ItemType {
    /// Wire tag.
    pub fn tag(self) -> u8 {
        match self {
            ItemType::Login => 0,
            ItemType::SecureNote => 1,
            ItemType::Card => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Login => "login",
            ItemType::SecureNote => "secure-note",
            ItemType::Card => "card",
        }
    }
}

impl TryFrom<u8> for ItemType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ItemType::Login),
            1 => Ok(ItemType::SecureNote),
            2 => Ok(ItemType::Card),
            other => Err(Error::Validation(format!("Unknown item type tag: {}", other))),
        }
    }
}

impl From<ItemType> for u8 {
    fn from(item_type: ItemType) -> u8 {
        item_type.tag()
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encrypted vault item as stored and transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultItem {
    /// Immutable, globally unique.
    pub id: ItemId,
    /// Immutable after creation.
    pub owner: IdentityId,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// nonce || ciphertext || tag, sealed under the vault key.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Grouping only; no referential checks.
    pub collection: Option<Uuid>,
    #[serde(default)]
    pub favorite: bool,
    /// Presentation hint.
    #[serde(default)]
    pub re_prompt: bool,
    pub version: u32,
    /// Stamped by the server on insert.
    pub created: DateTime<Utc>,
    /// Stamped by the server on every accepted write.
    pub last_modified: DateTime<Utc>,
}

impl VaultItem {
    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl IdentityRecord {
    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
