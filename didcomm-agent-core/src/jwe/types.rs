//! Algorithm identifiers carried in the protected header.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the content encryption key is delivered to each recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAgreementAlgorithm {
    /// Ephemeral-static X25519, HKDF-SHA256, AES key wrap
    #[serde(rename = "ECDH-ES+A256KW")]
    EcdhEsA256kw,
}

/// Content encryption algorithms.
///
/// ```rust
/// use didcomm_agent_core::jwe::types::ContentEncryptionAlgorithm;
///
/// assert_eq!(ContentEncryptionAlgorithm::default().to_string(), "A256GCM");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentEncryptionAlgorithm {
    /// AES-256-GCM
    #[default]
    #[serde(rename = "A256GCM")]
    A256Gcm,
    /// XChaCha20-Poly1305
    #[serde(rename = "XC20P")]
    Xc20P,
}

impl ContentEncryptionAlgorithm {
    /// Size of the initialization vector in bytes.
    #[must_use]
    pub fn nonce_len(self) -> usize {
        match self {
            Self::A256Gcm => 12,
            Self::Xc20P => 24,
        }
    }
}

impl fmt::Display for ContentEncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A256Gcm => write!(f, "A256GCM"),
            Self::Xc20P => write!(f, "XC20P"),
        }
    }
}

/// Curves for the ephemeral key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcdhCurve {
    /// Curve25519 in Montgomery form
    X25519,
}

impl fmt::Display for EcdhCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519")
    }
}
