//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use keyhaven_common::Result;
use keyhaven_crypto::KdfParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Parameters advertised by prelogin for unknown emails.
    pub default_kdf_params: KdfParams,
    /// Upper bound on an item ciphertext, in bytes.
    pub max_item_size: usize,
    /// Upper bound on the password hint, in characters.
    pub max_hint_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_kdf_params: KdfParams::interactive(),
            max_item_size: 64 * 1024,
            max_hint_length: 128,
        }
    }
}

impl ServerConfig {
    pub fn with_default_kdf_params(mut self, params: KdfParams) -> Self {
        self.default_kdf_params = params;
        self
    }

    pub fn with_max_item_size(mut self, bytes: usize) -> Self {
        self.max_item_size = bytes;
        self
    }

    pub fn with_max_hint_length(mut self, chars: usize) -> Self {
        self.max_hint_length = chars;
        self
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}
