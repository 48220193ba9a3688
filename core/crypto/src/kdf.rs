//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. Its output is
//! never used directly: it is split into two domain-separated values, the
//! [`AuthVerifier`] that the server compares and the [`LocalKey`] that
//! stays on the client.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keys::{AuthVerifier, LocalKey, Salt, KEY_LENGTH};
use keyhaven_common::{Error, Result};

const VERIFIER_CONTEXT: &[u8] = b"keyhaven/auth-verifier/v1";
const LOCAL_KEY_CONTEXT: &[u8] = b"keyhaven/local-key/v1";

/// Argon2 version 1.3.
pub const ARGON2_VERSION_13: u32 = 0x13;

/// Parameters for Argon2id key derivation.
///
/// Stored alongside the identity so derivation is reproducible and can be
/// upgraded per user without forcing a password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
    /// Argon2 algorithm version (0x13).
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    ARGON2_VERSION_13
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
            version: ARGON2_VERSION_13,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
            version: ARGON2_VERSION_13,
        }
    }

    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
            version: ARGON2_VERSION_13,
        }
    }

    /// Check the parameters are accepted by Argon2id.
    pub fn validate(&self) -> Result<()> {
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let version = Version::try_from(self.version)
            .map_err(|_| Error::Validation(format!("Unsupported Argon2 version: {:#x}", self.version)))?;

        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::Validation(format!("Invalid KDF parameters: {}", e)))?;

        Ok(Argon2::new(Algorithm::Argon2id, version, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// The two purpose-separated outputs of a derivation.
#[derive(Debug, Clone)]
pub struct DerivedSecrets {
    /// Sent to the server and compared there.
    pub verifier: AuthVerifier,
    /// Wraps the vault key; never leaves the client.
    pub local_key: LocalKey,
}

/// Derive the verifier and local key from a master secret.
///
/// # Preconditions
/// - `master_secret` must not be empty
/// - `params` must have valid Argon2id parameters
///
/// # Postconditions
/// - Output is deterministic given the same inputs
/// - `verifier` and `local_key` are independent: one cannot be computed
///   from the other
///
/// # Errors
/// - Returns error if the secret is empty
/// - Returns error if Argon2id parameters are invalid
///
/// # Security
/// - Each call allocates its own Argon2 working memory
/// - The intermediate Argon2 output is zeroized before returning
pub fn derive(master_secret: &[u8], salt: &Salt, params: &KdfParams) -> Result<DerivedSecrets> {
    if master_secret.is_empty() {
        return Err(Error::Validation("Master secret cannot be empty".to_string()));
    }

    let argon2 = params.argon2()?;

    let mut root = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(master_secret, salt.as_bytes(), &mut root)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    let verifier = AuthVerifier::from_bytes(expand(&root, VERIFIER_CONTEXT));
    let local_key = LocalKey::from_bytes(expand(&root, LOCAL_KEY_CONTEXT));
    root.zeroize();

    Ok(DerivedSecrets { verifier, local_key })
}

/// Re-derive and compare against a stored verifier in constant time.
///
/// Returns `Ok(false)` on mismatch; callers surface that as
/// [`Error::Authentication`].
pub fn verify(
    master_secret: &[u8],
    salt: &Salt,
    params: &KdfParams,
    stored: &AuthVerifier,
) -> Result<bool> {
    let derived = derive(master_secret, salt, params)?;
    Ok(derived.verifier.ct_eq(stored))
}

fn expand(root: &[u8; KEY_LENGTH], context: &[u8]) -> [u8; KEY_LENGTH] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(context);
    hasher.update(root);
    let mut out = [0u8; KEY_LENGTH];
    out.copy_from_slice(&hasher.finalize());
    out
}
