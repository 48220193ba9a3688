//! Item encryption and decryption.
//!
//! The payload is serialized to JSON (fields in declaration order) and
//! sealed under the vault key. The item id, owner, type tag and schema
//! version are bound as associated data, so the server cannot relabel,
//! reparent or move a ciphertext to another item without the tag check
//! failing on the client.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use zeroize::Zeroize;

use crate::item::ItemPayload;
use keyhaven_common::{Error, IdentityId, ItemId, Result};
use keyhaven_crypto::{aead, VaultKey};
use keyhaven_storage::{ItemType, VaultItem, ITEM_SCHEMA_VERSION};

const ITEM_AAD_CONTEXT: &[u8] = b"keyhaven/item/v1";

/// Plaintext metadata bound to an item ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    pub id: ItemId,
    pub owner: IdentityId,
    pub item_type: ItemType,
    pub version: u32,
}

impl ItemHeader {
    /// Header for a payload at the current schema version.
    pub fn new(id: ItemId, owner: IdentityId, item_type: ItemType) -> Self {
        Self {
            id,
            owner,
            item_type,
            version: ITEM_SCHEMA_VERSION,
        }
    }

    /// Header of a stored item.
    pub fn of(item: &VaultItem) -> Self {
        Self {
            id: item.id,
            owner: item.owner,
            item_type: item.item_type,
            version: item.version,
        }
    }

    fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(ITEM_AAD_CONTEXT.len() + 16 + 16 + 1 + 4);
        aad.extend_from_slice(ITEM_AAD_CONTEXT);
        aad.extend_from_slice(self.id.as_bytes());
        aad.extend_from_slice(self.owner.as_bytes());
        aad.push(self.item_type.tag());
        aad.extend_from_slice(&self.version.to_le_bytes());
        aad
    }
}

/// Encrypt a payload under the vault key.
///
/// # Preconditions
/// - `header.item_type` must match the payload variant
///
/// # Postconditions
/// - A fresh nonce is used for every call
/// - The serialized plaintext is zeroized before returning
///
/// # Errors
/// - Returns error if the header and payload disagree on type
pub fn encrypt(payload: &ItemPayload, header: &ItemHeader, vault_key: &VaultKey) -> Result<Vec<u8>> {
    if payload.item_type() != header.item_type {
        return Err(Error::Validation(format!(
            "Payload is {} but header says {}",
            payload.item_type(),
            header.item_type
        )));
    }

    let mut plaintext = match payload {
        ItemPayload::Login(data) => serde_json::to_vec(data)?,
        ItemPayload::SecureNote(data) => serde_json::to_vec(data)?,
        ItemPayload::Card(data) => serde_json::to_vec(data)?,
    };

    let result = aead::encrypt(vault_key.as_bytes(), &plaintext, &header.associated_data());
    plaintext.zeroize();
    result
}

/// Decrypt an item ciphertext.
///
/// # Errors
/// - `Validation` if the schema version is not supported
/// - `Crypto` ("Decryption failed") on a wrong key or any tampering with
///   the blob or the header
/// - `Validation` if the authentic plaintext does not match the schema for
///   its type tag
pub fn decrypt(blob: &[u8], header: &ItemHeader, vault_key: &VaultKey) -> Result<ItemPayload> {
    if header.version != ITEM_SCHEMA_VERSION {
        return Err(Error::Validation(format!(
            "Unsupported item schema version: {}",
            header.version
        )));
    }

    let mut plaintext = aead::decrypt(vault_key.as_bytes(), blob, &header.associated_data())?;

    let payload = match header.item_type {
        ItemType::Login => parse(&plaintext).map(ItemPayload::Login),
        ItemType::SecureNote => parse(&plaintext).map(ItemPayload::SecureNote),
        ItemType::Card => parse(&plaintext).map(ItemPayload::Card),
    };
    plaintext.zeroize();
    payload
}

fn parse<T: DeserializeOwned>(plaintext: &[u8]) -> Result<T> {
    serde_json::from_slice(plaintext)
        .map_err(|_| Error::Validation("Item payload does not match its type".to_string()))
}

/// Build a new encrypted item record.
///
/// Timestamps are provisional; the server stamps its own on insert.
pub fn seal(
    payload: &ItemPayload,
    id: ItemId,
    owner: IdentityId,
    vault_key: &VaultKey,
    now: DateTime<Utc>,
) -> Result<VaultItem> {
    let header = ItemHeader::new(id, owner, payload.item_type());
    let ciphertext = encrypt(payload, &header, vault_key)?;

    Ok(VaultItem {
        id,
        owner,
        item_type: header.item_type,
        ciphertext,
        collection: None,
        favorite: false,
        re_prompt: false,
        version: header.version,
        created: now,
        last_modified: now,
    })
}

/// Re-encrypt an existing item with new contents, keeping its id, owner
/// and flags.
pub fn reseal(item: &VaultItem, payload: &ItemPayload, vault_key: &VaultKey) -> Result<VaultItem> {
    let header = ItemHeader::new(item.id, item.owner, payload.item_type());
    let ciphertext = encrypt(payload, &header, vault_key)?;

    Ok(VaultItem {
        item_type: header.item_type,
        version: header.version,
        ciphertext,
        ..item.clone()
    })
}

/// Decrypt a stored item.
pub fn open(item: &VaultItem, vault_key: &VaultKey) -> Result<ItemPayload> {
    decrypt(&item.ciphertext, &ItemHeader::of(item), vault_key)
}
