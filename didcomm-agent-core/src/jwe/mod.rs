//! Anonymous envelope encryption (ECDH-ES+A256KW).
//!
//! The plaintext is sealed once under a random content key. That key is then
//! wrapped separately for each recipient under a KEK derived from an ECDH
//! exchange between a fresh ephemeral key and the recipient's X25519 key.
//! The base64url protected header is the AEAD's associated data, so the
//! header cannot be altered without failing authentication.
//!
//! ```text
//! {
//!   "protected": b64u({"typ","alg","enc","epk","salt"}),
//!   "recipients": [{"header": {"kid": "did:key:..."}, "encrypted_key": b64u}],
//!   "iv": b64u, "ciphertext": b64u, "tag": b64u
//! }
//! ```

pub mod algorithms;
pub mod error;
pub mod header;
pub mod key_agreement;
pub mod key_wrapping;
pub mod types;

use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;

use crate::error::{Error, Result};
use crate::plugin::DIDResolver;
use algorithms::{decrypt_content, encrypt_content, random_bytes};
use error::JweError;
use header::{base64url_decode, base64url_encode, EphemeralPublicKey, JweHeader};
use key_agreement::{static_agreement, SALT_LEN};
use key_wrapping::{unwrap_key, wrap_key, ContentEncryptionKey};

pub use types::{ContentEncryptionAlgorithm, EcdhCurve, KeyAgreementAlgorithm};

/// Per-recipient unprotected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientHeader {
    /// The recipient's key id (its DID)
    pub kid: String,
}

/// One recipient's wrapped copy of the content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweRecipient {
    /// Who this entry is for
    pub header: RecipientHeader,
    /// The wrapped content key, base64url
    pub encrypted_key: String,
}

/// An encrypted envelope in general JSON serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweMessage {
    /// base64url protected header
    pub protected: String,
    /// Wrapped content keys
    pub recipients: Vec<JweRecipient>,
    /// Content nonce, base64url
    pub iv: String,
    /// Sealed plaintext without its tag, base64url
    pub ciphertext: String,
    /// Authentication tag, base64url
    pub tag: String,
}

impl JweMessage {
    /// Seal `plaintext` for recipients given as `(kid, x25519 public key)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encryption`] if there are no recipients, and a
    /// [`JweError`] if a recipient key is unusable.
    pub fn encrypt_for(
        plaintext: &[u8],
        recipients: &[(String, [u8; 32])],
        enc: ContentEncryptionAlgorithm,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(Error::Encryption("no recipients".into()));
        }

        let salt = random_bytes(SALT_LEN);
        let cek = ContentEncryptionKey::generate();

        // Every recipient entry shares the one ephemeral key in the header.
        let ephemeral = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let epk = x25519_dalek::PublicKey::from(&ephemeral).to_bytes();

        let mut wrapped = Vec::with_capacity(recipients.len());
        for (kid, public) in recipients {
            let kek = static_agreement(&ephemeral, public, &salt)?;
            wrapped.push(JweRecipient {
                header: RecipientHeader { kid: kid.clone() },
                encrypted_key: base64url_encode(&wrap_key(&kek, &cek)?),
            });
        }

        let header = JweHeader::new(enc, EphemeralPublicKey::x25519(&epk), &salt);
        let protected = header.encode()?;
        let iv = random_bytes(enc.nonce_len());
        let (ciphertext, tag) = encrypt_content(enc, &cek, &iv, plaintext, protected.as_bytes())?;

        Ok(Self {
            protected,
            recipients: wrapped,
            iv: base64url_encode(&iv),
            ciphertext: base64url_encode(&ciphertext),
            tag: base64url_encode(&tag),
        })
    }

    /// Seal `plaintext` for `recipient_did`, resolving its key agreement key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] if the recipient has no resolvable key.
    pub async fn encrypt<R: DIDResolver + ?Sized>(
        plaintext: &[u8],
        recipient_did: &str,
        resolver: &R,
        enc: ContentEncryptionAlgorithm,
    ) -> Result<Self> {
        let key = resolver
            .resolve_key_agreement(recipient_did)
            .await
            .ok_or_else(|| Error::Resolution(format!("no key for recipient {recipient_did}")))?;
        let public = key.to_x25519()?;
        Self::encrypt_for(plaintext, &[(recipient_did.to_string(), public)], enc)
    }

    /// Open the envelope as `recipient_kid`.
    ///
    /// Every failure (unknown recipient, wrong key, tampered header or body)
    /// is an error; no partial plaintext is ever returned.
    ///
    /// # Errors
    ///
    /// Returns a [`JweError`] describing the first check that failed.
    pub fn decrypt(&self, recipient_kid: &str, secret: &StaticSecret) -> Result<Vec<u8>> {
        let kid = recipient_kid.split('#').next().unwrap_or_default();
        let recipient = self
            .recipients
            .iter()
            .find(|r| r.header.kid.split('#').next() == Some(kid))
            .ok_or_else(|| JweError::RecipientNotFound(recipient_kid.to_string()))?;

        let header = JweHeader::decode(&self.protected)?;
        let salt = header.salt_bytes()?;
        let kek = static_agreement(secret, &header.epk.to_bytes()?, &salt)?;
        let cek = unwrap_key(&kek, &base64url_decode("encrypted_key", &recipient.encrypted_key)?)?;

        let plaintext = decrypt_content(
            header.enc,
            &cek,
            &base64url_decode("iv", &self.iv)?,
            &base64url_decode("ciphertext", &self.ciphertext)?,
            &base64url_decode("tag", &self.tag)?,
            self.protected.as_bytes(),
        )?;
        Ok(plaintext)
    }

    /// The recipient key ids this envelope is addressed to.
    #[must_use]
    pub fn recipient_kids(&self) -> Vec<&str> {
        self.recipients.iter().map(|r| r.header.kid.as_str()).collect()
    }
}
