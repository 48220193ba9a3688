//! Client-side registration.

use tracing::debug;

use crate::api::RegisterRequest;
use keyhaven_common::{Error, Result};
use keyhaven_crypto::{kdf, wrap, IdentityKeyPair, KdfParams, Salt, VaultKey};

/// Normalize an email address for lookup.
///
/// # Errors
/// - Returns `Validation` if the address has no `@`
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(Error::Validation("Invalid email address".to_string())),
    }
}

/// Key material produced once per identity.
pub struct Registration {
    request: RegisterRequest,
    vault_key: VaultKey,
}

impl Registration {
    /// Generate every key a new identity needs.
    ///
    /// # Postconditions
    /// - A fresh salt, vault key and identity keypair are generated
    /// - The vault key is wrapped under the local key, and the private key
    ///   under the vault key
    /// - Only the verifier and wrapped material end up in the request
    ///
    /// # Errors
    /// - Invalid email
    /// - Empty master secret
    /// - Invalid KDF parameters
    pub fn create(
        email: &str,
        master_secret: &[u8],
        password_hint: Option<String>,
        kdf_params: KdfParams,
    ) -> Result<Self> {
        let email = normalize_email(email)?;
        kdf_params.validate()?;

        let salt = Salt::generate();
        let derived = kdf::derive(master_secret, &salt, &kdf_params)?;

        let vault_key = VaultKey::generate();
        let keypair = IdentityKeyPair::generate();

        let wrapped_vault_key = wrap::wrap_vault_key(&vault_key, &derived.local_key)?;
        let wrapped_private_key = wrap::wrap_private_key(&keypair, &vault_key)?;

        debug!("Generated vault key and identity keypair");

        Ok(Self {
            request: RegisterRequest {
                email,
                password_hint,
                salt,
                kdf_params,
                verifier: derived.verifier.clone(),
                wrapped_vault_key,
                wrapped_private_key,
                public_key: *keypair.public_key(),
            },
            vault_key,
        })
    }

    /// Body to send to the server.
    pub fn request(&self) -> &RegisterRequest {
        &self.request
    }

    /// The freshly generated vault key.
    pub fn vault_key(&self) -> &VaultKey {
        &self.vault_key
    }
}
