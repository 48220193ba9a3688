//! Key types with secure memory handling.
//!
//! All secret key types automatically zeroize their memory on drop to
//! prevent sensitive data from persisting in memory.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyhaven_common::encoding::b64_32;

/// Length of symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of KDF salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Key-encryption key derived from the master secret.
///
/// Never leaves the client. Its only job is wrapping the vault key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalKey {
    key: [u8; KEY_LENGTH],
}

impl LocalKey {
    /// Create a local key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalKey([REDACTED])")
    }
}

/// Long-lived symmetric key protecting every item ciphertext.
///
/// Generated once per identity at registration. Password rotation changes
/// only the key that wraps it, never its value.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LENGTH],
}

impl VaultKey {
    /// Create a vault key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random vault key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKey([REDACTED])")
    }
}

/// Authentication verifier derived from the master secret.
///
/// This is the only derived value that is ever sent to the server. It is
/// domain-separated from [`LocalKey`], so holding it yields nothing that
/// unwraps the vault key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct AuthVerifier(#[serde(with = "b64_32")] [u8; KEY_LENGTH]);

impl AuthVerifier {
    /// Create a verifier from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the verifier bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &AuthVerifier) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }

    /// Digest kept by the server instead of the verifier itself.
    ///
    /// A leaked identity table then holds neither the verifier nor anything
    /// that decrypts.
    pub fn digest(&self) -> VerifierDigest {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(b"keyhaven/verifier-digest/v1");
        hasher.update(self.0);
        let mut out = [0u8; KEY_LENGTH];
        out.copy_from_slice(&hasher.finalize());
        VerifierDigest(out)
    }
}

impl fmt::Debug for AuthVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthVerifier([REDACTED])")
    }
}

/// Server-side digest of an [`AuthVerifier`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerifierDigest(#[serde(with = "b64_32")] [u8; KEY_LENGTH]);

impl VerifierDigest {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the digest bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Check a presented verifier in constant time.
    pub fn matches(&self, presented: &AuthVerifier) -> bool {
        self.0[..].ct_eq(&presented.digest().0[..]).into()
    }
}

impl fmt::Debug for VerifierDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifierDigest([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Salt(#[serde(with = "b64_32")] pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// X25519 public half of an identity keypair. Safe to disclose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityPublicKey(#[serde(with = "b64_32")] [u8; KEY_LENGTH]);

impl IdentityPublicKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

/// Identity keypair, kept for future sharing.
///
/// The private half is only ever persisted wrapped under the vault key.
pub struct IdentityKeyPair {
    secret: StaticSecret,
    public: IdentityPublicKey,
}

impl IdentityKeyPair {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let keypair = Self::from_secret_bytes(bytes);
        bytes.zeroize();
        keypair
    }

    /// Rebuild a keypair from its private scalar.
    pub fn from_secret_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = IdentityPublicKey(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Public half.
    pub fn public_key(&self) -> &IdentityPublicKey {
        &self.public
    }

    /// Private scalar bytes, for wrapping.
    pub(crate) fn secret_bytes(&self) -> [u8; KEY_LENGTH] {
        self.secret.to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
