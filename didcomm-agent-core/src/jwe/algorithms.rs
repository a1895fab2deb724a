//! Content encryption.
//!
//! Both AEADs append a 16 byte tag to the ciphertext; it is split off so the
//! envelope can carry it in its own field.

use rand_core::{OsRng, RngCore};

use super::error::{JweError, Result};
use super::key_wrapping::ContentEncryptionKey;
use super::types::ContentEncryptionAlgorithm;

/// Size of the authentication tag of both supported AEADs.
pub const TAG_LEN: usize = 16;

/// `len` bytes from the operating system's CSPRNG.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Encrypt `plaintext`, returning `(ciphertext, tag)`.
///
/// # Errors
///
/// Returns [`JweError::Encryption`] if the nonce has the wrong length or the
/// cipher fails.
pub fn encrypt_content(
    enc: ContentEncryptionAlgorithm,
    cek: &ContentEncryptionKey,
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    if nonce.len() != enc.nonce_len() {
        return Err(JweError::Encryption(format!(
            "{enc} requires a {} byte nonce",
            enc.nonce_len()
        )));
    }

    let payload = aes_gcm::aead::Payload {
        msg: plaintext,
        aad,
    };
    let mut sealed = match enc {
        ContentEncryptionAlgorithm::A256Gcm => {
            use aes_gcm::aead::{Aead, KeyInit};
            use aes_gcm::{Aes256Gcm, Nonce};

            Aes256Gcm::new(cek.as_bytes().into()).encrypt(Nonce::from_slice(nonce), payload)
        }
        ContentEncryptionAlgorithm::Xc20P => {
            use chacha20poly1305::aead::{Aead, KeyInit};
            use chacha20poly1305::{XChaCha20Poly1305, XNonce};

            XChaCha20Poly1305::new(cek.as_bytes().into())
                .encrypt(XNonce::from_slice(nonce), payload)
        }
    }
    .map_err(|_| JweError::Encryption(format!("{enc} encryption failed")))?;

    let tag = sealed.split_off(sealed.len() - TAG_LEN);
    Ok((sealed, tag))
}

/// Decrypt and authenticate `ciphertext` with its detached `tag`.
///
/// # Errors
///
/// Returns [`JweError::AuthenticationFailed`] if the tag does not verify.
pub fn decrypt_content(
    enc: ContentEncryptionAlgorithm,
    cek: &ContentEncryptionKey,
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != enc.nonce_len() || tag.len() != TAG_LEN {
        return Err(JweError::AuthenticationFailed);
    }

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    let payload = aes_gcm::aead::Payload { msg: &sealed, aad };

    match enc {
        ContentEncryptionAlgorithm::A256Gcm => {
            use aes_gcm::aead::{Aead, KeyInit};
            use aes_gcm::{Aes256Gcm, Nonce};

            Aes256Gcm::new(cek.as_bytes().into()).decrypt(Nonce::from_slice(nonce), payload)
        }
        ContentEncryptionAlgorithm::Xc20P => {
            use chacha20poly1305::aead::{Aead, KeyInit};
            use chacha20poly1305::{XChaCha20Poly1305, XNonce};

            XChaCha20Poly1305::new(cek.as_bytes().into())
                .decrypt(XNonce::from_slice(nonce), payload)
        }
    }
    .map_err(|_| JweError::AuthenticationFailed)
}
