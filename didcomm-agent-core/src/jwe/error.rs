//! Error types for envelope encryption.

use base64::DecodeError;
use std::error::Error as StdError;
use std::fmt;

/// Result type for JWE operations.
pub type Result<T> = std::result::Result<T, JweError>;

/// Errors raised while sealing or opening an envelope.
///
/// # Examples
///
/// ```
/// use didcomm_agent_core::jwe::error::JweError;
///
/// let error = JweError::InvalidKey("key must be 32 bytes".to_string());
/// assert_eq!(error.to_string(), "Invalid key: key must be 32 bytes");
/// ```
#[derive(Debug)]
pub enum JweError {
    /// ECDH or key derivation failed
    KeyAgreement(String),
    /// The protected header is missing or malformed
    Header(String),
    /// Key material has the wrong size or shape
    InvalidKey(String),
    /// Content encryption or key wrapping failed
    Encryption(String),
    /// The envelope is not addressed to the given key
    RecipientNotFound(String),
    /// Unwrapping the content key or the AEAD tag check failed
    AuthenticationFailed,
    /// A base64url field could not be decoded
    Base64(&'static str, DecodeError),
    /// JSON serialization error
    Serialization(serde_json::Error),
    /// The header names an algorithm we do not implement
    InvalidAlgorithm(String),
}

impl fmt::Display for JweError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyAgreement(msg) => write!(f, "Key agreement error: {msg}"),
            Self::Header(msg) => write!(f, "Header error: {msg}"),
            Self::InvalidKey(msg) => write!(f, "Invalid key: {msg}"),
            Self::Encryption(msg) => write!(f, "Encryption error: {msg}"),
            Self::RecipientNotFound(kid) => write!(f, "No recipient entry for {kid}"),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Base64(field, err) => write!(f, "Base64 error in {field}: {err}"),
            Self::Serialization(err) => write!(f, "Serialization error: {err}"),
            Self::InvalidAlgorithm(msg) => write!(f, "Invalid algorithm: {msg}"),
        }
    }
}

impl StdError for JweError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Base64(_, err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for JweError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}
