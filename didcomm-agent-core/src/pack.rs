//! Message packing and unpacking.
//!
//! Packing signs a message with the local key and seals it for one
//! recipient. Unpacking opens the envelope and checks the proof; a message
//! whose proof does not verify is returned without it, so callers can tell
//! authenticated traffic apart.

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::jwe::{ContentEncryptionAlgorithm, JweMessage};
use crate::plugin::{DIDResolver, KeyCustody};
use crate::signing::{sign_message, verified_signer};
use crate::types::Message;

/// An opened message and the DID that provably signed it.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedMessage {
    /// The plaintext message; its proof is present only if it verified
    pub message: Message,
    /// The verified signer, if any
    pub signer: Option<String>,
}

impl UnpackedMessage {
    /// Whether the message carried a valid proof.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.signer.is_some()
    }
}

/// Sign `message` and seal it for `to_did`.
///
/// # Errors
///
/// Returns an error if serialization fails or the recipient has no usable
/// key agreement key.
pub async fn pack_message(
    message: &Message,
    to_did: &str,
    keys: &dyn KeyCustody,
    resolver: &dyn DIDResolver,
    enc: ContentEncryptionAlgorithm,
) -> Result<String> {
    let signed = sign_message(message, keys)?;
    let plaintext = serde_json::to_vec(&signed)?;
    let jwe = JweMessage::encrypt(&plaintext, to_did, resolver, enc).await?;
    Ok(serde_json::to_string(&jwe)?)
}

/// Open an envelope addressed to `keys` and verify the enclosed proof.
///
/// # Errors
///
/// Returns an error if the envelope is malformed, not addressed to us, fails
/// authentication, or does not contain a DIDComm message.
pub async fn unpack_message(
    envelope: &Value,
    keys: &dyn KeyCustody,
    resolver: &dyn DIDResolver,
) -> Result<UnpackedMessage> {
    let jwe: JweMessage = serde_json::from_value(envelope.clone())
        .map_err(|e| Error::InvalidFormat(format!("not an encrypted envelope: {e}")))?;
    let plaintext = jwe.decrypt(keys.did(), keys.agreement_secret())?;

    let mut value: Value = serde_json::from_slice(&plaintext)
        .map_err(|e| Error::InvalidFormat(format!("envelope plaintext is not JSON: {e}")))?;
    let signer = verified_signer(&value, resolver).await;
    if signer.is_none() {
        if let Some(object) = value.as_object_mut() {
            if object.remove("proof").is_some() {
                debug!("Dropped unverified proof");
            }
        }
    }

    let message: Message = serde_json::from_value(value)?;
    Ok(UnpackedMessage { message, signer })
}
