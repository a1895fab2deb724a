//! Local key material for a `did:key` identity.

use std::fmt;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use x25519_dalek::StaticSecret;

use crate::did::{did_key_from_public_key, PublicKey};
use crate::plugin::KeyCustody;

/// An Ed25519 signing key, the X25519 secret derived from it, and the
/// `did:key` they are published under.
pub struct LocalKeys {
    did: String,
    signing_key: SigningKey,
    agreement_secret: StaticSecret,
}

impl LocalKeys {
    /// Generate a fresh identity.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Build an identity from an existing signing key.
    ///
    /// The agreement secret is the signing key's scalar, so senders that only
    /// know the `did:key` can encrypt to us.
    #[must_use]
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let agreement_secret = StaticSecret::from(signing_key.to_scalar_bytes());
        let did = did_key_from_public_key(&PublicKey::ed25519(
            signing_key.verifying_key().to_bytes(),
        ));
        Self {
            did,
            signing_key,
            agreement_secret,
        }
    }

    /// Build an identity for a DID whose keys are managed elsewhere.
    #[must_use]
    pub fn from_parts(
        did: impl Into<String>,
        signing_key: SigningKey,
        agreement_secret: StaticSecret,
    ) -> Self {
        Self {
            did: did.into(),
            signing_key,
            agreement_secret,
        }
    }

    /// The Ed25519 public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::ed25519(self.signing_key.verifying_key().to_bytes())
    }

    /// The X25519 public key.
    #[must_use]
    pub fn agreement_public_key(&self) -> PublicKey {
        PublicKey::x25519(x25519_dalek::PublicKey::from(&self.agreement_secret).to_bytes())
    }
}

impl KeyCustody for LocalKeys {
    fn did(&self) -> &str {
        &self.did
    }

    fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    fn agreement_secret(&self) -> &StaticSecret {
        &self.agreement_secret
    }
}

impl fmt::Debug for LocalKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeys")
            .field("did", &self.did)
            .finish_non_exhaustive()
    }
}
