//! Plaintext item payloads.
//!
//! These only ever exist on the client. The server sees the type tag and
//! an opaque blob.

use serde::{Deserialize, Serialize};

use keyhaven_storage::ItemType;

/// Website or application credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub uris: Vec<String>,
    pub totp: Option<String>,
    pub notes: Option<String>,
}

/// Free-form secret text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureNoteData {
    pub title: String,
    pub note: String,
}

/// Payment card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardData {
    pub name: String,
    pub cardholder_name: String,
    pub number: String,
    pub exp_month: Option<u8>,
    pub exp_year: Option<u16>,
    pub code: Option<String>,
    pub notes: Option<String>,
}

/// Decrypted item contents, one variant per [`ItemType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemPayload {
    Login(LoginData),
    SecureNote(SecureNoteData),
    Card(CardData),
}

impl ItemPayload {
    /// Type tag carried outside the ciphertext.
    pub fn item_type(&self) -> ItemType {
        match self {
            ItemPayload::Login(_) => ItemType::Login,
            ItemPayload::SecureNote(_) => ItemType::SecureNote,
            ItemPayload::Card(_) => ItemType::Card,
        }
    }

    /// Human label for listings.
    pub fn title(&self) -> &str {
        match self {
            ItemPayload::Login(data) => &data.name,
            ItemPayload::SecureNote(data) => &data.title,
            ItemPayload::Card(data) => &data.name,
        }
    }

    /// Reject payloads that would be useless once stored.
    pub fn validate(&self) -> keyhaven_common::Result<()> {
        let ok = match self {
            ItemPayload::Login(data) => !data.name.trim().is_empty(),
            ItemPayload::SecureNote(data) => !data.title.trim().is_empty(),
            ItemPayload::Card(data) => {
                !data.name.trim().is_empty()
                    && data.exp_month.map_or(true, |m| (1..=12).contains(&m))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(keyhaven_common::Error::Validation(format!(
                "Invalid {} payload",
                self.item_type()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_type_matches_variant() {
        let note = ItemPayload::SecureNote(SecureNoteData {
            title: "wifi".to_string(),
            note: "hunter2".to_string(),
        });
        assert_eq!(note.item_type(), ItemType::SecureNote);
        assert_eq!(note.title(), "wifi");
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let login = ItemPayload::Login(LoginData::default());
        assert!(login.validate().is_err());
    }

    #[test]
    fn test_validate_card_month() {
        let card = ItemPayload::Card(CardData {
            name: "visa".to_string(),
            exp_month: Some(13),
            ..Default::default()
        });
        assert!(card.validate().is_err());
    }
}
