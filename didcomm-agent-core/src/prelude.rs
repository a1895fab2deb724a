//! Commonly used types and traits.
//!
//! ```rust
//! use didcomm_agent_core::prelude::*;
//!
//! let keys = LocalKeys::generate();
//! let ping = Message::new(TRUST_PING, serde_json::json!({"response_requested": true}))
//!     .from(keys.did());
//! let signed = sign_message(&ping, &keys).unwrap();
//! assert!(signed.proof.is_some());
//! ```

pub use crate::error::{Error, Result};

pub use crate::plugin::{DIDResolver, KeyCustody};

pub use crate::did::{decode_did_key, did_key_from_public_key, KeyKind, PublicKey};
pub use crate::keys::LocalKeys;
pub use crate::protocol::*;
pub use crate::types::{Message, MessageId, MessageType, Proof};

pub use crate::jwe::{ContentEncryptionAlgorithm, JweMessage};

pub use crate::pack::{pack_message, unpack_message, UnpackedMessage};
pub use crate::signing::{sign_message, verify_message};
