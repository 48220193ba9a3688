//! Common utilities and types shared across keyhaven modules.
//!
//! This module provides the error taxonomy and the identifier types that
//! every other crate speaks, so that ids and failures mean the same thing
//! on the client and on the server.

pub mod encoding;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{IdentityId, ItemId, SensitiveBytes};
