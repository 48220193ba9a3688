//! Cryptographic primitives for keyhaven.
//!
//! This module provides:
//! - Key derivation using Argon2id, split into a server-facing verifier and
//!   a client-only local key
//! - Authenticated encryption using XChaCha20-Poly1305 with associated data
//! - Key wrapping for the vault key and the identity private key
//! - Secure key types with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons
//! - Nonces are generated inside `encrypt`; callers cannot supply one

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod wrap;

pub use aead::{decrypt, encrypt};
pub use kdf::{derive, verify, DerivedSecrets, KdfParams};
pub use keys::{
    AuthVerifier, IdentityKeyPair, IdentityPublicKey, LocalKey, Salt, VaultKey, VerifierDigest,
};
pub use wrap::{KeyPurpose, WrappedKey};
