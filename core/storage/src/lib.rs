//! Storage abstraction for keyhaven.
//!
//! This module defines the durable record shapes and a trait-based
//! interface over storage backends (in-memory, local filesystem).
//!
//! # Design Principles
//! - Opaque storage: records carry ciphertext and wrapped keys only
//! - Async operations: All I/O operations are async
//! - Atomic identity updates via compare-and-swap

pub mod local;
pub mod memory;
pub mod provider;
pub mod records;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{IdentityStore, ItemStore};
pub use records::{IdentityRecord, ItemType, VaultItem, ITEM_SCHEMA_VERSION};
