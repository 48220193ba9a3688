//! Server-side handlers for keyhaven.
//!
//! This module provides:
//! - Identity registration, prelogin, authentication and password rotation
//! - Item insert, update, delete, lookup and incremental sync
//! - Bearer-token sessions
//! - A strictly increasing clock for write stamps and sync watermarks
//! - An in-process [`keyhaven_sync::SyncRemote`] for driving a client
//!
//! Handlers are transport-agnostic: they take typed requests and return
//! typed responses. Nothing here can decrypt an item or unwrap a key.

pub mod auth;
pub mod clock;
pub mod config;
pub mod identity;
pub mod items;
pub mod remote;

pub use auth::{SessionResolver, TokenRegistry};
pub use clock::MonotonicClock;
pub use config::ServerConfig;
pub use identity::IdentityService;
pub use items::ItemService;
pub use remote::InProcessRemote;

use rand::RngCore;
use std::sync::Arc;

use keyhaven_storage::{IdentityStore, ItemStore, MemoryStore};

/// Identity and item services sharing one clock and one session table.
pub struct Server {
    identity: IdentityService,
    items: ItemService,
    sessions: Arc<dyn SessionResolver>,
}

impl Server {
    pub fn new(
        identity_store: Arc<dyn IdentityStore>,
        item_store: Arc<dyn ItemStore>,
        config: ServerConfig,
    ) -> Self {
        let clock = Arc::new(MonotonicClock::new());
        let sessions: Arc<dyn SessionResolver> = Arc::new(TokenRegistry::new());

        let mut prelogin_secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut prelogin_secret);

        Self {
            identity: IdentityService::new(
                identity_store,
                sessions.clone(),
                clock.clone(),
                config.clone(),
                prelogin_secret,
            ),
            items: ItemService::new(item_store, clock, config),
            sessions,
        }
    }

    /// Server over a fresh [`MemoryStore`] with default config.
    pub fn in_memory() -> Self {
        let store = MemoryStore::new();
        Self::new(
            Arc::new(store.clone()),
            Arc::new(store),
            ServerConfig::default(),
        )
    }

    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    pub fn items(&self) -> &ItemService {
        &self.items
    }

    pub fn sessions(&self) -> &dyn SessionResolver {
        self.sessions.as_ref()
    }

    /// Sync transport authenticated by `token`.
    pub fn connect(self: &Arc<Self>, token: impl Into<String>) -> InProcessRemote {
        InProcessRemote::new(self.clone(), token)
    }
}
