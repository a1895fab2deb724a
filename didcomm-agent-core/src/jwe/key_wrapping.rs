//! AES key wrap (RFC 3394) of the content encryption key.

use aes_kw::KekAes256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::algorithms::random_bytes;
use super::error::{JweError, Result};
use super::key_agreement::KeyEncryptionKey;

/// Size of a wrapped 256-bit key.
pub const WRAPPED_KEY_LEN: usize = 40;

/// A 256-bit content encryption key, wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentEncryptionKey([u8; 32]);

impl ContentEncryptionKey {
    /// A fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&random_bytes(32));
        Self(key)
    }

    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Wrap `cek` under `kek`.
///
/// # Errors
///
/// Returns [`JweError::Encryption`] if wrapping fails.
pub fn wrap_key(kek: &KeyEncryptionKey, cek: &ContentEncryptionKey) -> Result<Vec<u8>> {
    let kek = KekAes256::from(*kek.as_bytes());
    let mut wrapped = vec![0u8; WRAPPED_KEY_LEN];
    kek.wrap(cek.as_bytes(), &mut wrapped)
        .map_err(|e| JweError::Encryption(format!("key wrap failed: {e}")))?;
    Ok(wrapped)
}

/// Unwrap a content key.
///
/// # Errors
///
/// Returns [`JweError::AuthenticationFailed`] if the integrity check fails,
/// which is what a wrong KEK produces.
pub fn unwrap_key(kek: &KeyEncryptionKey, wrapped: &[u8]) -> Result<ContentEncryptionKey> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(JweError::InvalidKey(format!(
            "wrapped key must be {WRAPPED_KEY_LEN} bytes"
        )));
    }
    let kek = KekAes256::from(*kek.as_bytes());
    let mut cek = ContentEncryptionKey([0u8; 32]);
    kek.unwrap(wrapped, &mut cek.0)
        .map_err(|_| JweError::AuthenticationFailed)?;
    Ok(cek)
}
