//! Key wrapping.
//!
//! A wrapped key is an AEAD blob whose associated data names its purpose,
//! so a wrapped vault key can never be accepted where a wrapped private key
//! is expected (and vice versa).

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::aead;
use crate::keys::{IdentityKeyPair, IdentityPublicKey, LocalKey, VaultKey, KEY_LENGTH};
use keyhaven_common::encoding::b64;
use keyhaven_common::{Error, Result, SensitiveBytes};

/// What a wrapped key is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    /// Vault key wrapped under the local key.
    VaultKey,
    /// Identity private key wrapped under the vault key.
    IdentityPrivateKey,
}

impl KeyPurpose {
    fn aad(self) -> Vec<u8> {
        let label: &[u8] = match self {
            KeyPurpose::VaultKey => b"vault-key",
            KeyPurpose::IdentityPrivateKey => b"identity-private-key",
        };
        [b"keyhaven/wrap/v1/".as_slice(), label].concat()
    }
}

/// A key encrypted under another key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Purpose bound into the ciphertext.
    pub purpose: KeyPurpose,
    /// nonce || ciphertext || tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Wrap arbitrary secret bytes under a key-encryption key.
pub fn wrap(secret: &[u8], kek: &[u8; KEY_LENGTH], purpose: KeyPurpose) -> Result<WrappedKey> {
    let ciphertext = aead::encrypt(kek, secret, &purpose.aad())?;
    Ok(WrappedKey {
        purpose,
        ciphertext,
    })
}

/// Unwrap a key previously produced by [`wrap`].
///
/// # Errors
/// - Returns a generic crypto error for a wrong key or tampered blob
pub fn unwrap(wrapped: &WrappedKey, kek: &[u8; KEY_LENGTH]) -> Result<SensitiveBytes> {
    aead::decrypt(kek, &wrapped.ciphertext, &wrapped.purpose.aad()).map(SensitiveBytes::new)
}

/// Wrap the vault key under the local key.
pub fn wrap_vault_key(vault_key: &VaultKey, local_key: &LocalKey) -> Result<WrappedKey> {
    wrap(vault_key.as_bytes(), local_key.as_bytes(), KeyPurpose::VaultKey)
}

/// Recover the vault key using the local key.
///
/// # Errors
/// - Returns error if the blob is not a wrapped vault key
/// - Returns a generic crypto error if the local key is wrong (wrong password)
pub fn unwrap_vault_key(wrapped: &WrappedKey, local_key: &LocalKey) -> Result<VaultKey> {
    if wrapped.purpose != KeyPurpose::VaultKey {
        return Err(Error::Crypto("Decryption failed".to_string()));
    }
    let bytes = unwrap(wrapped, local_key.as_bytes())?;
    let key: [u8; KEY_LENGTH] = bytes
        .as_bytes()
        .try_into()
        .map_err(|_| Error::Crypto("Decryption failed".to_string()))?;
    Ok(VaultKey::from_bytes(key))
}

/// Wrap the identity private key under the vault key.
pub fn wrap_private_key(keypair: &IdentityKeyPair, vault_key: &VaultKey) -> Result<WrappedKey> {
    let mut secret = keypair.secret_bytes();
    let wrapped = wrap(&secret, vault_key.as_bytes(), KeyPurpose::IdentityPrivateKey);
    secret.zeroize();
    wrapped
}

/// Recover the identity keypair and check it matches the published key.
///
/// # Errors
/// - Returns a generic crypto error if the vault key is wrong
/// - Returns error if the recovered key does not match `expected_public`
pub fn unwrap_private_key(
    wrapped: &WrappedKey,
    vault_key: &VaultKey,
    expected_public: &IdentityPublicKey,
) -> Result<IdentityKeyPair> {
    if wrapped.purpose != KeyPurpose::IdentityPrivateKey {
        return Err(Error::Crypto("Decryption failed".to_string()));
    }
    let bytes = unwrap(wrapped, vault_key.as_bytes())?;
    let mut secret: [u8; KEY_LENGTH] = bytes
        .as_bytes()
        .try_into()
        .map_err(|_| Error::Crypto("Decryption failed".to_string()))?;
    let keypair = IdentityKeyPair::from_secret_bytes(secret);
    secret.zeroize();

    if keypair.public_key() != expected_public {
        return Err(Error::Crypto(
            "Identity private key does not match public key".to_string(),
        ));
    }
    Ok(keypair)
}
