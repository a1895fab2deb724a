//! The protected header and base64url helpers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{JweError, Result};
use super::types::{ContentEncryptionAlgorithm, EcdhCurve, KeyAgreementAlgorithm};

/// Media type of encrypted DIDComm messages.
pub const ENCRYPTED_MEDIA_TYPE: &str = "application/didcomm-encrypted+json";

const SUPPORTED_KEY_AGREEMENT: &[&str] = &["ECDH-ES+A256KW"];
const SUPPORTED_CONTENT_ENCRYPTION: &[&str] = &["A256GCM", "XC20P"];

/// The protected header, shared by all recipients and bound as AAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    /// Media type
    pub typ: String,
    /// Key agreement algorithm
    pub alg: KeyAgreementAlgorithm,
    /// Content encryption algorithm
    pub enc: ContentEncryptionAlgorithm,
    /// Sender's ephemeral public key
    pub epk: EphemeralPublicKey,
    /// HKDF salt, base64url
    pub salt: String,
}

/// An ephemeral X25519 public key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralPublicKey {
    /// Always `OKP`
    pub kty: String,
    /// The curve
    pub crv: EcdhCurve,
    /// The public key, base64url
    pub x: String,
}

impl EphemeralPublicKey {
    /// Wrap raw X25519 public key bytes.
    #[must_use]
    pub fn x25519(public: &[u8; 32]) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: EcdhCurve::X25519,
            x: base64url_encode(public),
        }
    }

    /// The raw public key bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `x` is not base64url or not 32 bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32]> {
        base64url_decode("epk.x", &self.x)?
            .try_into()
            .map_err(|_| JweError::InvalidKey("ephemeral key must be 32 bytes".into()))
    }
}

impl JweHeader {
    /// A header for an ECDH-ES+A256KW envelope.
    #[must_use]
    pub fn new(enc: ContentEncryptionAlgorithm, epk: EphemeralPublicKey, salt: &[u8]) -> Self {
        Self {
            typ: ENCRYPTED_MEDIA_TYPE.to_string(),
            alg: KeyAgreementAlgorithm::EcdhEsA256kw,
            enc,
            epk,
            salt: base64url_encode(salt),
        }
    }

    /// The salt bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the salt is not base64url.
    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        base64url_decode("salt", &self.salt)
    }

    /// base64url of the header's JSON, the form placed in `protected`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(base64url_encode(&serde_json::to_vec(self)?))
    }

    /// Parse a `protected` value.
    ///
    /// # Errors
    ///
    /// Returns [`JweError::InvalidAlgorithm`] if `alg` or `enc` names an
    /// algorithm we do not implement, and [`JweError::Header`] if the value is
    /// not a base64url JSON header.
    pub fn decode(protected: &str) -> Result<Self> {
        let json = base64url_decode("protected", protected)?;
        let value: Value =
            serde_json::from_slice(&json).map_err(|e| JweError::Header(e.to_string()))?;

        for (field, supported) in [
            ("alg", SUPPORTED_KEY_AGREEMENT),
            ("enc", SUPPORTED_CONTENT_ENCRYPTION),
        ] {
            if let Some(name) = value.get(field).and_then(Value::as_str) {
                if !supported.contains(&name) {
                    return Err(JweError::InvalidAlgorithm(format!("{field} {name}")));
                }
            }
        }
        serde_json::from_value(value).map_err(|e| JweError::Header(e.to_string()))
    }
}

/// Unpadded base64url.
#[must_use]
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded base64url, naming `field` on failure.
///
/// # Errors
///
/// Returns [`JweError::Base64`] for invalid input.
pub fn base64url_decode(field: &'static str, data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| JweError::Base64(field, e))
}
