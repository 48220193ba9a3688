//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Every call to
//! [`encrypt`] draws a fresh nonce from the OS RNG; there is no API that
//! accepts a caller-chosen nonce.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use keyhaven_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt plaintext, authenticating `aad` alongside it.
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated per call
/// - `aad` is authenticated but not encrypted or included in the output
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn encrypt(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::Crypto("Encryption failed".to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt a blob produced by [`encrypt`] with the same `aad`.
///
/// # Postconditions
/// - Verifies the authentication tag before returning anything
/// - On failure nothing of the plaintext is returned
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if the blob is too short
/// - Returns error if authentication fails (wrong key, wrong aad, tampered data)
pub fn decrypt(key: &[u8], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Decryption failed".to_string()));
    }

    let (nonce_bytes, encrypted) = blob.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: encrypted,
                aad,
            },
        )
        .map_err(|_| Error::Crypto("Decryption failed".to_string()))
}

/// Nonce portion of a blob produced by [`encrypt`].
pub fn nonce_of(blob: &[u8]) -> Option<&[u8]> {
    blob.get(..NONCE_SIZE)
}

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}
