//! ECDH-ES key agreement and HKDF derivation of the key encryption key.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{JweError, Result};

/// HKDF info label binding derived keys to this envelope format.
pub const KEK_INFO: &[u8] = b"DIDComm-v2 ECDH-ES+A256KW";

/// Size of the per-envelope HKDF salt.
pub const SALT_LEN: usize = 16;

/// A 256-bit key encryption key, wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey([u8; 32]);

impl KeyEncryptionKey {
    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive a key encryption key from an ECDH shared secret.
///
/// # Errors
///
/// Returns [`JweError::KeyAgreement`] if `salt` is empty.
pub fn derive_key_encryption_key(shared_secret: &[u8], salt: &[u8]) -> Result<KeyEncryptionKey> {
    if salt.is_empty() {
        return Err(JweError::KeyAgreement("HKDF salt must not be empty".into()));
    }
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = [0u8; 32];
    hkdf.expand(KEK_INFO, &mut okm)
        .map_err(|e| JweError::KeyAgreement(e.to_string()))?;
    Ok(KeyEncryptionKey(okm))
}

/// Agree on a KEK between `secret` and `peer_public`.
///
/// The sender calls this with its ephemeral secret and each recipient's
/// key; a recipient calls it with its own secret and the published
/// ephemeral key. Both arrive at the same KEK.
///
/// # Errors
///
/// Returns [`JweError::KeyAgreement`] if the peer key is a low-order point.
pub fn static_agreement(
    secret: &StaticSecret,
    peer_public: &[u8; 32],
    salt: &[u8],
) -> Result<KeyEncryptionKey> {
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(JweError::KeyAgreement("non-contributory peer key".into()));
    }
    derive_key_encryption_key(shared.as_bytes(), salt)
}
