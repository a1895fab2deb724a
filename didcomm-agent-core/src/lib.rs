//! Core `DIDComm` v2 building blocks for a client agent.
//!
//! This crate holds the parts of an agent that need no I/O:
//!
//! - `did`: the `did:key` codec and DID Document key extraction
//! - `keys` / `plugin`: local key custody and the resolver seam
//! - `canonical` / `signing`: deterministic JSON and Ed25519 message proofs
//! - `jwe`: anonymous ECDH-ES+A256KW envelope encryption
//! - `pack`: sign-then-encrypt and decrypt-then-verify
//! - `protocol`: Trust Ping and Coordinate Mediation vocabulary
//!
//! # Examples
//!
//! ```rust,no_run
//! use didcomm_agent_core::prelude::*;
//!
//! async fn example(resolver: &dyn DIDResolver, bob: &str) -> Result<()> {
//!     let keys = LocalKeys::generate();
//!     let message = Message::new(TRUST_PING, serde_json::json!({"response_requested": true}))
//!         .from(keys.did())
//!         .to([bob]);
//!
//!     let enc = ContentEncryptionAlgorithm::default();
//!     let packed = pack_message(&message, bob, &keys, resolver, enc).await?;
//!     println!("{packed}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod canonical;
pub mod did;
pub mod error;
pub mod jwe;
pub mod keys;
pub mod pack;
pub mod plugin;
pub mod prelude;
pub mod protocol;
pub mod signing;
pub mod types;


pub use error::{Error, Result};
pub use keys::LocalKeys;
pub use pack::{pack_message, unpack_message, UnpackedMessage};
pub use plugin::{DIDResolver, KeyCustody};
pub use protocol::MessageKind;
pub use types::{Message, MessageId, MessageType, Proof};
