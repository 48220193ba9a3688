//! Bearer credentials.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use keyhaven_common::{Error, IdentityId, Result};

/// Resolves a bearer credential to the identity it was issued for.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Issue a new credential.
    async fn issue(&self, identity: IdentityId) -> Result<String>;

    /// Resolve a credential.
    ///
    /// # Errors
    /// - `Authentication` for unknown or revoked credentials
    async fn resolve(&self, token: &str) -> Result<IdentityId>;

    /// Revoke every credential of an identity.
    async fn revoke_all(&self, identity: IdentityId) -> Result<()>;
}

/// In-memory token table.
#[derive(Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, IdentityId>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionResolver for TokenRegistry {
    async fn issue(&self, identity: IdentityId) -> Result<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = URL_SAFE_NO_PAD.encode(raw);

        self.tokens.write().await.insert(token.clone(), identity);
        debug!(identity_id = %identity, "Issued session token");
        Ok(token)
    }

    async fn resolve(&self, token: &str) -> Result<IdentityId> {
        self.tokens
            .read()
            .await
            .get(token)
            .copied()
            .ok_or(Error::Authentication)
    }

    async fn revoke_all(&self, identity: IdentityId) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, owner| *owner != identity);
        debug!(identity_id = %identity, revoked = before - tokens.len(), "Revoked sessions");
        Ok(())
    }
}
