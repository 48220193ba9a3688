//! Master-secret rotation.
//!
//! Only the wrapping of the vault key changes. The vault key itself, the
//! wrapped private key (under the vault key) and every item ciphertext
//! stay byte-identical.

use tracing::info;

use crate::api::{ChangePasswordRequest, ChangePasswordResponse};
use crate::config::ClientProfile;
use keyhaven_common::{Error, Result};
use keyhaven_crypto::{kdf, wrap, KdfParams, Salt};

/// A prepared rotation waiting for the server to accept it.
///
/// Nothing in the profile changes until [`PasswordRotation::commit`], so a
/// failed or lost upload leaves the old secret fully working.
#[derive(Debug)]
pub struct PasswordRotation {
    request: ChangePasswordRequest,
}

impl PasswordRotation {
    /// Re-derive under a fresh salt and re-wrap the vault key.
    ///
    /// # Preconditions
    /// - `profile` holds the current wrapped vault key and KDF inputs
    ///
    /// # Postconditions
    /// - The request carries proofs of both secrets, the new salt and
    ///   params, the re-wrapped vault key and the CAS guard
    ///
    /// # Errors
    /// - `Authentication` if `old_secret` does not unwrap the vault key
    /// - `Validation` if the new secret is empty or params are invalid
    pub fn prepare(
        profile: &ClientProfile,
        old_secret: &[u8],
        new_secret: &[u8],
        new_kdf_params: Option<KdfParams>,
    ) -> Result<Self> {
        let old = kdf::derive(old_secret, &profile.salt, &profile.kdf_params)?;
        let vault_key = wrap::unwrap_vault_key(&profile.wrapped_vault_key, &old.local_key)
            .map_err(|_| Error::Authentication)?;

        let new_kdf_params = new_kdf_params.unwrap_or_else(|| profile.kdf_params.clone());
        new_kdf_params.validate()?;
        let new_salt = Salt::generate();
        let new = kdf::derive(new_secret, &new_salt, &new_kdf_params)?;

        let new_wrapped_vault_key = wrap::wrap_vault_key(&vault_key, &new.local_key)?;

        Ok(Self {
            request: ChangePasswordRequest {
                old_verifier: old.verifier.clone(),
                new_verifier: new.verifier.clone(),
                new_salt,
                new_kdf_params,
                new_wrapped_vault_key,
                expected_last_password_change: profile.last_password_change,
            },
        })
    }

    /// Body to send to the server.
    pub fn request(&self) -> &ChangePasswordRequest {
        &self.request
    }

    /// Apply the new material locally, after the server accepted it.
    pub fn commit(self, profile: &mut ClientProfile, response: ChangePasswordResponse) {
        profile.salt = self.request.new_salt;
        profile.kdf_params = self.request.new_kdf_params;
        profile.wrapped_vault_key = self.request.new_wrapped_vault_key;
        profile.last_password_change = response.last_password_change;
        info!(identity_id = %profile.identity_id, "Password rotation committed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RegisterResponse;
    use crate::identity::Registration;
    use crate::item::{ItemPayload, LoginData};
    use crate::session::VaultSession;
    use crate::test_support::fast_params;
    use chrono::{Duration, Utc};
    use keyhaven_common::IdentityId;

    fn profile() -> ClientProfile {
        let registration = Registration::create("a@example.com", b"P1", None, fast_params()).unwrap();
        let response = RegisterResponse {
            id: IdentityId::generate(),
            created: Utc::now(),
        };
        ClientProfile::from_registration(registration.request(), &response)
    }

    #[test]
    fn test_wrong_old_secret_aborts() {
        let profile = profile();
        let result = PasswordRotation::prepare(&profile, b"nope", b"P2", None);
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn test_rotation_keeps_vault_key_and_items() {
        let mut profile = profile();
        let session = VaultSession::unlock(&profile, b"P1").unwrap();
        let item = session
            .seal_item(&ItemPayload::Login(LoginData {
                name: "a".to_string(),
                ..Default::default()
            }))
            .unwrap();
        let wrapped_private_key = profile.wrapped_private_key.clone();

        let rotation = PasswordRotation::prepare(&profile, b"P1", b"P2", None).unwrap();
        assert_ne!(rotation.request().new_salt, profile.salt);
        let response = ChangePasswordResponse {
            last_password_change: profile.last_password_change + Duration::seconds(1),
        };
        rotation.commit(&mut profile, response);

        assert!(VaultSession::unlock(&profile, b"P1").is_err());
        let session = VaultSession::unlock(&profile, b"P2").unwrap();
        assert!(session.open_item(&item).is_ok());
        assert_eq!(profile.wrapped_private_key, wrapped_private_key);
    }

    #[test]
    fn test_uncommitted_rotation_leaves_profile_valid() {
        let profile = profile();
        let before = profile.wrapped_vault_key.clone();

        let _rotation = PasswordRotation::prepare(&profile, b"P1", b"P2", None).unwrap();

        assert_eq!(profile.wrapped_vault_key, before);
        assert!(VaultSession::unlock(&profile, b"P1").is_ok());
    }

    #[test]
    fn test_cas_guard_is_current_value() {
        let profile = profile();
        let rotation = PasswordRotation::prepare(&profile, b"P1", b"P2", None).unwrap();
        assert_eq!(
            rotation.request().expected_last_password_change,
            profile.last_password_change
        );
    }

    #[test]
    fn test_rotation_can_upgrade_params() {
        let mut profile = profile();
        let mut heavier = fast_params();
        heavier.time_cost = 2;

        let rotation =
            PasswordRotation::prepare(&profile, b"P1", b"P2", Some(heavier.clone())).unwrap();
        rotation.commit(
            &mut profile,
            ChangePasswordResponse {
                last_password_change: Utc::now(),
            },
        );

        assert_eq!(profile.kdf_params, heavier);
        assert!(VaultSession::unlock(&profile, b"P2").is_ok());
    }
}
