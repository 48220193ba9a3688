//! Client-side vault for keyhaven.
//!
//! This module provides:
//! - Item payload schemas and their encryption under the vault key
//! - Registration key generation
//! - Session handling with secure key management
//! - Master-secret rotation
//! - Request and response bodies shared with the server
//!
//! # Architecture
//! The vault module sits between the user interface and the server. All
//! encryption and decryption happens here; the server only ever sees
//! verifiers, wrapped keys and item ciphertext.

pub mod api;
pub mod codec;
pub mod config;
pub mod identity;
pub mod item;
pub mod rotation;
pub mod session;

pub use codec::ItemHeader;
pub use config::ClientProfile;
pub use identity::{normalize_email, Registration};
pub use item::{CardData, ItemPayload, LoginData, SecureNoteData};
pub use rotation::PasswordRotation;
pub use session::{derive_in_background, SessionHandle, SessionState, VaultSession};
