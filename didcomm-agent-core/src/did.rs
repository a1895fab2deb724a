//! DID key material: the `did:key` codec and key extraction from DID Documents.
//!
//! A `did:key` embeds its public key directly: `did:key:z<base58btc(codec || key)>`
//! where `codec` is a two byte multicodec prefix. Registry DIDs resolve to a
//! DID Document whose verification methods carry the key in one of three
//! encodings, tried in the order `publicKeyBase58`, `publicKeyMultibase`,
//! `publicKeyHex`.

use std::fmt;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Prefix of every self-certifying key DID.
pub const DID_KEY_PREFIX: &str = "did:key:";

/// Multicodec prefix for Ed25519 public keys.
pub const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Multicodec prefix for X25519 public keys.
pub const X25519_MULTICODEC: [u8; 2] = [0xec, 0x01];

const MULTICODEC_PREFIX_LEN: usize = 2;
const KEY_LEN: usize = 32;

/// The algorithm a public key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Signing key
    Ed25519,
    /// Key agreement key
    X25519,
}

impl KeyKind {
    /// The multicodec prefix used for this kind inside a `did:key`.
    #[must_use]
    pub fn multicodec(self) -> [u8; 2] {
        match self {
            Self::Ed25519 => ED25519_MULTICODEC,
            Self::X25519 => X25519_MULTICODEC,
        }
    }

    fn from_multicodec(prefix: &[u8]) -> Option<Self> {
        match prefix {
            [0xed, 0x01] => Some(Self::Ed25519),
            [0xec, 0x01] => Some(Self::X25519),
            _ => None,
        }
    }

    fn from_method_type(typ: &str) -> Self {
        if typ.contains("X25519") {
            Self::X25519
        } else {
            Self::Ed25519
        }
    }
}

/// Raw public key bytes tagged with their algorithm.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    kind: KeyKind,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(kind: KeyKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// An Ed25519 verification key.
    #[must_use]
    pub fn ed25519(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyKind::Ed25519, bytes.into())
    }

    /// An X25519 key agreement key.
    #[must_use]
    pub fn x25519(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyKind::X25519, bytes.into())
    }

    /// The key's algorithm.
    #[must_use]
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The key as an Ed25519 verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] for X25519 keys or malformed bytes.
    pub fn to_ed25519(&self) -> Result<VerifyingKey> {
        if self.kind != KeyKind::Ed25519 {
            return Err(Error::InvalidKey("not an Ed25519 key".into()));
        }
        let bytes: [u8; KEY_LEN] = self
            .bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey("Ed25519 key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// The key in X25519 form, converting Ed25519 keys to their Montgomery form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the bytes are not a valid key.
    pub fn to_x25519(&self) -> Result<[u8; KEY_LEN]> {
        match self.kind {
            KeyKind::X25519 => self
                .bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidKey("X25519 key must be 32 bytes".into())),
            KeyKind::Ed25519 => Ok(self.to_ed25519()?.to_montgomery().to_bytes()),
        }
    }

    /// `z`-prefixed base58btc of the multicodec-prefixed key.
    #[must_use]
    pub fn to_multibase(&self) -> String {
        let mut prefixed = self.kind.multicodec().to_vec();
        prefixed.extend_from_slice(&self.bytes);
        format!("z{}", bs58::encode(prefixed).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("kind", &self.kind)
            .field("multibase", &self.to_multibase())
            .finish()
    }
}

/// Whether `did` is a self-certifying key DID.
#[must_use]
pub fn is_did_key(did: &str) -> bool {
    did.starts_with(DID_KEY_PREFIX)
}

/// Build the `did:key` for a public key.
#[must_use]
pub fn did_key_from_public_key(key: &PublicKey) -> String {
    format!("{DID_KEY_PREFIX}{}", key.to_multibase())
}

/// Decode the key embedded in a `did:key`.
///
/// Any DID URL fragment is ignored.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] if the DID is not a base58btc `did:key`, the
/// decoded payload is no longer than the multicodec prefix, the codec is
/// unsupported, or the key has the wrong length.
pub fn decode_did_key(did: &str) -> Result<PublicKey> {
    let id = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| Error::InvalidKey(format!("{did} is not a did:key")))?;
    let id = id.split('#').next().unwrap_or_default();
    let encoded = id
        .strip_prefix('z')
        .ok_or_else(|| Error::InvalidKey("did:key must use base58btc multibase".into()))?;
    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidKey(format!("invalid base58: {e}")))?;

    if decoded.len() <= MULTICODEC_PREFIX_LEN {
        return Err(Error::InvalidKey("did:key payload too short".into()));
    }
    let (prefix, key) = decoded.split_at(MULTICODEC_PREFIX_LEN);
    let kind = KeyKind::from_multicodec(prefix).ok_or_else(|| {
        Error::InvalidKey(format!("unsupported multicodec 0x{}", hex::encode(prefix)))
    })?;
    if key.len() != KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "expected a 32 byte key, got {}",
            key.len()
        )));
    }
    Ok(PublicKey::new(kind, key.to_vec()))
}

/// Extract the first usable key from a DID Document's verification methods.
///
/// Embedded `keyAgreement` methods are searched after `verificationMethod`.
#[must_use]
pub fn extract_public_key(document: &Value) -> Option<PublicKey> {
    methods(document).find_map(key_from_method)
}

/// Extract the key agreement key from a DID Document, if it declares one.
#[must_use]
pub fn extract_key_agreement_key(document: &Value) -> Option<PublicKey> {
    let referenced: Vec<&str> = document["keyAgreement"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect();

    methods(document)
        .filter(|method| {
            let id = method["id"].as_str().unwrap_or_default();
            let typ = method["type"].as_str().unwrap_or_default();
            typ.contains("X25519") || referenced.iter().any(|r| id_matches(id, r))
        })
        .filter_map(key_from_method)
        .find(|key| key.kind() == KeyKind::X25519)
}

/// The DIDComm messaging endpoint advertised by a DID Document.
#[must_use]
pub fn extract_service_endpoint(document: &Value) -> Option<String> {
    document["service"]
        .as_array()?
        .iter()
        .filter(|service| {
            matches!(
                service["type"].as_str(),
                Some("DIDCommMessaging" | "did-communication")
            )
        })
        .find_map(|service| match &service["serviceEndpoint"] {
            Value::String(uri) => Some(uri.clone()),
            Value::Object(endpoint) => endpoint.get("uri")?.as_str().map(str::to_string),
            Value::Array(endpoints) => endpoints.iter().find_map(|e| match e {
                Value::String(uri) => Some(uri.clone()),
                other => other["uri"].as_str().map(str::to_string),
            }),
            _ => None,
        })
}

fn methods(document: &Value) -> impl Iterator<Item = &Value> {
    let verification = document["verificationMethod"].as_array().into_iter().flatten();
    let agreement = document["keyAgreement"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|method| method.is_object());
    verification.chain(agreement)
}

fn id_matches(id: &str, reference: &str) -> bool {
    id == reference || (reference.starts_with('#') && id.ends_with(reference))
}

fn key_from_method(method: &Value) -> Option<PublicKey> {
    let kind = KeyKind::from_method_type(method["type"].as_str().unwrap_or_default());

    if let Some(bytes) = method["publicKeyBase58"]
        .as_str()
        .and_then(|b58| bs58::decode(b58).into_vec().ok())
        .filter(|bytes| !bytes.is_empty())
    {
        return Some(PublicKey::new(kind, bytes));
    }

    if let Some(key) = method["publicKeyMultibase"]
        .as_str()
        .and_then(|multibase| decode_multibase_key(multibase, kind))
    {
        return Some(key);
    }

    method["publicKeyHex"]
        .as_str()
        .and_then(|h| hex::decode(h).ok())
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| PublicKey::new(kind, bytes))
}

fn decode_multibase_key(multibase: &str, fallback: KeyKind) -> Option<PublicKey> {
    let decoded = bs58::decode(multibase.strip_prefix('z')?).into_vec().ok()?;
    if decoded.len() == MULTICODEC_PREFIX_LEN + KEY_LEN {
        let (prefix, key) = decoded.split_at(MULTICODEC_PREFIX_LEN);
        if let Some(kind) = KeyKind::from_multicodec(prefix) {
            return Some(PublicKey::new(kind, key.to_vec()));
        }
    }
    (!decoded.is_empty()).then(|| PublicKey::new(fallback, decoded))
}
