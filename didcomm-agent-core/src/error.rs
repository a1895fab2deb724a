//! Error types for the didcomm-agent-core crate.

use thiserror::Error;

use crate::jwe::error::JweError;

/// Error type for the DIDComm core library
#[derive(Debug, Error)]
pub enum Error {
    /// A DID could not be resolved to the key an operation needs
    #[error("DID resolution error: {0}")]
    Resolution(String),
    /// Invalid format error
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Key material was malformed or of the wrong kind
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(String),
    /// A message or argument violates the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Envelope cipher error
    #[error(transparent)]
    Jwe(#[from] JweError),
    /// Serialization error
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Result type for the DIDComm core library
pub type Result<T> = std::result::Result<T, Error>;
