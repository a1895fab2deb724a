//! Error types for the didcomm-agent-node crate.

use thiserror::Error;

/// The main error type for agent operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the core crate.
    #[error("Core error: {0}")]
    Core(#[from] didcomm_agent_core::Error),

    /// A caller argument or peer message violates the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Delivering a message failed.
    #[error("{operation} to {target} failed: {reason}")]
    Communication {
        /// What was being attempted
        operation: &'static str,
        /// The endpoint or DID involved
        target: String,
        /// Why it failed
        reason: String,
    },

    /// An error occurred during HTTP operations.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The component was disposed before the operation completed.
    #[error("Agent has been disposed")]
    Disposed,
}

/// A specialized Result type for agent operations.
pub type Result<T> = std::result::Result<T, Error>;
