//! keyhaven sync engine.
//!
//! This module keeps a client's local replica of encrypted items in step
//! with the server:
//! - Incremental sync from a server-issued watermark
//! - Deterministic last-writer-wins merge, server authoritative
//! - Conflict reporting when server-wins discards a local change
//! - Pushing local creations, edits and deletions
//! - Retry with exponential backoff for transport failures
//!
//! The engine handles ciphertext only and never needs the vault key.

pub mod conflict;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod state;

pub use conflict::{ConflictInfo, ConflictKind};
pub use reconciler::{merge, MergeOutcome, PushOutcome, SyncConfig, SyncReconciler};
pub use remote::SyncRemote;
pub use retry::{RetryConfig, RetryExecutor};
pub use state::{LocalReplica, ReplicaEntry, SyncStatus};
