//! Core DIDComm v2 type definitions.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A DIDComm message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageType(pub String);

impl MessageType {
    /// Create a new message type
    pub fn new(typ: impl Into<String>) -> Self {
        Self(typ.into())
    }

    /// Get the message type as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Represents a DIDComm message ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new message ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random message ID
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the message ID as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Detached proof attached to a signed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    /// The proof suite
    #[serde(rename = "type")]
    pub typ: String,
    /// When the proof was produced (seconds since the epoch)
    pub created: u64,
    /// `<signer did>#keys-1`
    pub verification_method: String,
    /// Always `authentication` for DIDComm messages
    pub proof_purpose: String,
    /// Multibase (base58btc) encoded signature
    pub proof_value: String,
}

impl Proof {
    /// The DID part of the verification method.
    #[must_use]
    pub fn signer_did(&self) -> &str {
        self.verification_method
            .split('#')
            .next()
            .unwrap_or_default()
    }
}

/// Represents a DIDComm message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The message ID
    pub id: MessageId,
    /// The message type
    #[serde(rename = "type")]
    pub typ: MessageType,
    /// The sender's DID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// The recipient's DIDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    /// The thread this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,
    /// The time the message was created
    pub created_time: u64,
    /// The time the message expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<u64>,
    /// The message body
    #[serde(default)]
    pub body: serde_json::Value,
    /// The signature over the canonical form of everything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

impl Message {
    /// Create a new message with a fresh random id.
    pub fn new(typ: impl Into<String>, body: impl Into<serde_json::Value>) -> Self {
        Self {
            id: MessageId::random(),
            typ: MessageType::new(typ),
            from: None,
            to: Vec::new(),
            thid: None,
            created_time: unix_now(),
            expires_time: None,
            body: body.into(),
            proof: None,
        }
    }

    /// Create a response to `original`: a fresh id threaded to the original one.
    pub fn in_reply_to(
        original: &Message,
        typ: impl Into<String>,
        body: impl Into<serde_json::Value>,
    ) -> Self {
        Self::new(typ, body).thid(original.id.as_str())
    }

    /// Set the sender of the message
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the recipients of the message
    #[must_use]
    pub fn to(mut self, to: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.to = to.into_iter().map(Into::into).collect();
        self
    }

    /// Set the thread id
    #[must_use]
    pub fn thid(mut self, thid: impl Into<String>) -> Self {
        self.thid = Some(thid.into());
        self
    }

    /// Expire the message `ttl` after its creation time
    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_time = Some(self.created_time.saturating_add(ttl.as_secs()));
        self
    }

    /// Whether the message has passed its expiry time at `now` (epoch seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_time.is_some_and(|expires| expires < now)
    }

    /// The first recipient, which is who an envelope is addressed to.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
