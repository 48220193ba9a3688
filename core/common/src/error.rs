//! Common error types for keyhaven.

use thiserror::Error;

/// Top-level error type for keyhaven operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The presented verifier did not match.
    ///
    /// Deliberately carries no detail: callers must not learn whether the
    /// identity exists.
    #[error("Authentication failed")]
    Authentication,

    /// A valid identity asked for a resource it does not own.
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Authentication-tag failure on unwrap or decrypt, or a bad key.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed payload shape or out-of-range value.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic concurrency check failed.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport to the server failed.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether re-driving the same operation may succeed.
    ///
    /// Only transport and I/O failures qualify. Retrying a crypto or
    /// authentication failure with the same inputs cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }

    /// Collapse the error into what may be shown to a remote caller.
    ///
    /// Authentication, authorization and not-found failures become one
    /// indistinguishable not-found, and crypto failures lose their detail.
    pub fn into_public(self) -> Self {
        match self {
            Error::Authentication | Error::Authorization(_) | Error::NotFound(_) => {
                Error::NotFound("resource not found".to_string())
            }
            Error::Crypto(_) => Error::Crypto("decryption failed".to_string()),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
