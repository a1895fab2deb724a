//! Ed25519 message proofs.
//!
//! A proof signs the canonical form of the message (see [`crate::canonical`])
//! and names the signer through its verification method. Verification never
//! errors: anything that does not check out is simply unverified.

use ed25519_dalek::{Signature, Signer, Verifier};
use serde_json::Value;
use tracing::debug;

use crate::canonical::canonical_bytes;
use crate::error::Result;
use crate::plugin::{DIDResolver, KeyCustody};
use crate::types::{unix_now, Message, Proof};

/// Proof suite attached to signed messages.
pub const PROOF_TYPE: &str = "Ed25519Signature2020";

/// Proof purpose attached to signed messages.
pub const PROOF_PURPOSE: &str = "authentication";

/// Fragment of the signer's key in the verification method.
pub const VERIFICATION_KEY_FRAGMENT: &str = "#keys-1";

/// Sign `message` with the custody's key, replacing any existing proof.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn sign_message(message: &Message, keys: &dyn KeyCustody) -> Result<Message> {
    let mut unsigned = message.clone();
    unsigned.proof = None;

    let payload = canonical_bytes(&serde_json::to_value(&unsigned)?);
    let signature = keys.signing_key().sign(&payload);

    unsigned.proof = Some(Proof {
        typ: PROOF_TYPE.to_string(),
        created: unix_now(),
        verification_method: format!("{}{VERIFICATION_KEY_FRAGMENT}", keys.did()),
        proof_purpose: PROOF_PURPOSE.to_string(),
        proof_value: format!("z{}", bs58::encode(signature.to_bytes()).into_string()),
    });
    Ok(unsigned)
}

/// The DID that validly signed `value`, if any.
///
/// The signer must resolve to an Ed25519 key, the signature must match the
/// canonical form, and when the message names a sender it must be the signer.
pub async fn verified_signer(value: &Value, resolver: &dyn DIDResolver) -> Option<String> {
    let proof: Proof = match serde_json::from_value(value.get("proof")?.clone()) {
        Ok(proof) => proof,
        Err(e) => {
            debug!("Malformed proof: {}", e);
            return None;
        }
    };
    let signer = proof.signer_did();

    if let Some(from) = value.get("from").and_then(Value::as_str) {
        if from != signer {
            debug!("Proof signer {} does not match sender {}", signer, from);
            return None;
        }
    }

    let Some(signature) = decode_signature(&proof.proof_value) else {
        debug!("Undecodable proof value from {}", signer);
        return None;
    };

    let Some(public_key) = resolver.resolve(signer).await else {
        debug!("No key for signer {}", signer);
        return None;
    };
    let verifying_key = match public_key.to_ed25519() {
        Ok(key) => key,
        Err(e) => {
            debug!("Signer {} key unusable: {}", signer, e);
            return None;
        }
    };

    let payload = canonical_bytes(value);
    match verifying_key.verify(&payload, &signature) {
        Ok(()) => Some(signer.to_string()),
        Err(_) => {
            debug!("Signature from {} does not verify", signer);
            None
        }
    }
}

/// Whether `value` carries a valid proof.
pub async fn verify_value(value: &Value, resolver: &dyn DIDResolver) -> bool {
    verified_signer(value, resolver).await.is_some()
}

/// Whether `message` carries a valid proof.
pub async fn verify_message(message: &Message, resolver: &dyn DIDResolver) -> bool {
    match serde_json::to_value(message) {
        Ok(value) => verify_value(&value, resolver).await,
        Err(_) => false,
    }
}

fn decode_signature(proof_value: &str) -> Option<Signature> {
    let bytes = bs58::decode(proof_value.strip_prefix('z')?).into_vec().ok()?;
    Signature::from_slice(&bytes).ok()
}
