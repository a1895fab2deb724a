//! Plugin traits for the seams an agent depends on.
//!
//! - [`DIDResolver`]: maps a DID to its public key material and endpoint
//! - [`KeyCustody`]: holds the local identity's private keys
//!
//! Both are object safe so agents can hold them as `Arc<dyn ...>`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use didcomm_agent_core::did::{decode_did_key, PublicKey};
//! use didcomm_agent_core::plugin::DIDResolver;
//!
//! struct KeyOnlyResolver;
//!
//! #[async_trait::async_trait]
//! impl DIDResolver for KeyOnlyResolver {
//!     async fn resolve(&self, did: &str) -> Option<PublicKey> {
//!         decode_did_key(did).ok()
//!     }
//! }
//! ```

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use x25519_dalek::StaticSecret;

use crate::did::PublicKey;

/// Resolves DIDs to public key material.
///
/// Resolution failures are absence, not errors: callers decide whether a
/// missing key is fatal.
#[async_trait]
pub trait DIDResolver: Send + Sync {
    /// The DID's verification key.
    async fn resolve(&self, did: &str) -> Option<PublicKey>;

    /// The key envelopes for `did` should be encrypted to.
    ///
    /// Defaults to the verification key; Ed25519 keys are converted to
    /// X25519 at encryption time.
    async fn resolve_key_agreement(&self, did: &str) -> Option<PublicKey> {
        self.resolve(did).await
    }

    /// The DID's DIDComm service endpoint, if it advertises one.
    async fn resolve_endpoint(&self, _did: &str) -> Option<String> {
        None
    }
}

/// Custody of the local identity's private keys.
pub trait KeyCustody: Send + Sync {
    /// The local DID.
    fn did(&self) -> &str;

    /// The Ed25519 key messages are signed with.
    fn signing_key(&self) -> &SigningKey;

    /// The X25519 secret envelopes addressed to us are opened with.
    fn agreement_secret(&self) -> &StaticSecret;
}
