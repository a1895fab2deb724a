//! Protocol vocabulary: message type URIs, typed bodies, and the
//! [`MessageKind`] sum type inbound messages are decoded into once.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::Message;

/// Trust Ping request.
pub const TRUST_PING: &str = "https://didcomm.org/trust-ping/2.0/ping";
/// Trust Ping response.
pub const TRUST_PING_RESPONSE: &str = "https://didcomm.org/trust-ping/2.0/ping-response";

/// Ask a mediator to route messages for us.
pub const MEDIATE_REQUEST: &str = "https://didcomm.org/coordinate-mediation/2.0/mediate-request";
/// The mediator accepted.
pub const MEDIATE_GRANT: &str = "https://didcomm.org/coordinate-mediation/2.0/mediate-grant";
/// The mediator refused.
pub const MEDIATE_DENY: &str = "https://didcomm.org/coordinate-mediation/2.0/mediate-deny";
/// Add or remove recipient DIDs at the mediator.
pub const KEYLIST_UPDATE: &str = "https://didcomm.org/coordinate-mediation/2.0/keylist-update";
/// Per-entry results of a keylist update.
pub const KEYLIST_UPDATE_RESPONSE: &str =
    "https://didcomm.org/coordinate-mediation/2.0/keylist-update-response";
/// Ask the mediator which recipient DIDs it holds.
pub const KEYLIST_QUERY: &str = "https://didcomm.org/coordinate-mediation/2.0/keylist-query";
/// Answer to a keylist query.
pub const KEYLIST: &str = "https://didcomm.org/coordinate-mediation/2.0/keylist";

fn default_true() -> bool {
    true
}

/// Body of a trust ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingBody {
    /// Whether the receiver should answer with a ping-response
    #[serde(default = "default_true")]
    pub response_requested: bool,
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for PingBody {
    fn default() -> Self {
        Self {
            response_requested: true,
            comment: None,
        }
    }
}

/// Body of a trust ping response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponseBody {
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Body of a mediate-grant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediateGrantBody {
    /// DIDs senders must route through to reach us
    #[serde(default)]
    pub routing_did: Vec<String>,
}

/// Keylist update action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeylistAction {
    /// Register a recipient DID
    Add,
    /// Unregister a recipient DID
    Remove,
}

/// One entry of a keylist update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdate {
    /// The DID being registered or unregistered
    pub recipient_did: String,
    /// What to do with it
    pub action: KeylistAction,
}

/// Body of a keylist-update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdateBody {
    /// Ordered updates, adds first
    #[serde(default)]
    pub updates: Vec<KeylistUpdate>,
}

/// Mediator verdict for a single keylist update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeylistUpdateResult {
    /// Applied
    Success,
    /// Rejected because of the request
    ClientError,
    /// Rejected because of the mediator
    ServerError,
    /// Already in the requested state
    NoChange,
}

/// One entry of a keylist-update-response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdated {
    /// The DID the update concerned
    pub recipient_did: String,
    /// The requested action
    pub action: KeylistAction,
    /// The outcome
    pub result: KeylistUpdateResult,
}

/// Body of a keylist-update-response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdateResponseBody {
    /// Results in request order
    #[serde(default)]
    pub updated: Vec<KeylistUpdated>,
}

/// Pagination for keylist queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginate {
    /// Maximum number of keys to return
    pub limit: u32,
    /// Keys to skip
    #[serde(default)]
    pub offset: u32,
}

/// Body of a keylist-query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistQueryBody {
    /// Optional page window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paginate: Option<Paginate>,
}

/// A key held by the mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistKey {
    /// The registered DID
    pub recipient_did: String,
}

/// Body of a keylist answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistBody {
    /// The registered DIDs
    #[serde(default)]
    pub keys: Vec<KeylistKey>,
}

/// Known message kinds, decoded once from the `type` URI at ingress.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// trust-ping/2.0/ping
    Ping(PingBody),
    /// trust-ping/2.0/ping-response
    PingResponse(PingResponseBody),
    /// coordinate-mediation/2.0/mediate-request
    MediateRequest,
    /// coordinate-mediation/2.0/mediate-grant
    MediateGrant(MediateGrantBody),
    /// coordinate-mediation/2.0/mediate-deny
    MediateDeny,
    /// coordinate-mediation/2.0/keylist-update
    KeylistUpdate(KeylistUpdateBody),
    /// coordinate-mediation/2.0/keylist-update-response
    KeylistUpdateResponse(KeylistUpdateResponseBody),
    /// coordinate-mediation/2.0/keylist-query
    KeylistQuery(KeylistQueryBody),
    /// coordinate-mediation/2.0/keylist
    Keylist(KeylistBody),
    /// Anything else, carrying the raw type URI
    Unknown(String),
}

impl MessageKind {
    /// Decode the kind of `message` from its type and body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the type is known but the body does not
    /// match it.
    pub fn decode(message: &Message) -> Result<Self> {
        let body = &message.body;
        Ok(match message.typ.as_str() {
            TRUST_PING => Self::Ping(decode_body(TRUST_PING, body)?),
            TRUST_PING_RESPONSE => Self::PingResponse(decode_body(TRUST_PING_RESPONSE, body)?),
            MEDIATE_REQUEST => Self::MediateRequest,
            MEDIATE_GRANT => Self::MediateGrant(decode_body(MEDIATE_GRANT, body)?),
            MEDIATE_DENY => Self::MediateDeny,
            KEYLIST_UPDATE => Self::KeylistUpdate(decode_body(KEYLIST_UPDATE, body)?),
            KEYLIST_UPDATE_RESPONSE => {
                Self::KeylistUpdateResponse(decode_body(KEYLIST_UPDATE_RESPONSE, body)?)
            }
            KEYLIST_QUERY => Self::KeylistQuery(decode_body(KEYLIST_QUERY, body)?),
            KEYLIST => Self::Keylist(decode_body(KEYLIST, body)?),
            other => Self::Unknown(other.to_string()),
        })
    }

    /// Whether this kind belongs to the coordinate-mediation family.
    #[must_use]
    pub fn is_mediation(&self) -> bool {
        matches!(
            self,
            Self::MediateRequest
                | Self::MediateGrant(_)
                | Self::MediateDeny
                | Self::KeylistUpdate(_)
                | Self::KeylistUpdateResponse(_)
                | Self::KeylistQuery(_)
                | Self::Keylist(_)
        )
    }
}

fn decode_body<T: DeserializeOwned>(typ: &str, body: &Value) -> Result<T> {
    // A missing body is an empty one.
    let body = if body.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        body.clone()
    };
    serde_json::from_value(body).map_err(|e| Error::Protocol(format!("invalid {typ} body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_ping_defaults_to_response_requested() {
        let ping = Message::new(TRUST_PING, serde_json::Value::Null);
        assert_eq!(
            MessageKind::decode(&ping).unwrap(),
            MessageKind::Ping(PingBody::default())
        );

        let ping = Message::new(TRUST_PING, json!({"response_requested": false, "comment": "hi"}));
        let MessageKind::Ping(body) = MessageKind::decode(&ping).unwrap() else {
            panic!("expected a ping");
        };
        assert!(!body.response_requested);
        assert_eq!(body.comment.as_deref(), Some("hi"));
    }

    #[test]
    fn test_decode_mediation_family() {
        let grant = Message::new(MEDIATE_GRANT, json!({"routing_did": ["did:example:router"]}));
        let kind = MessageKind::decode(&grant).unwrap();
        assert!(kind.is_mediation());
        assert_eq!(
            kind,
            MessageKind::MediateGrant(MediateGrantBody {
                routing_did: vec!["did:example:router".to_string()]
            })
        );

        let response = Message::new(
            KEYLIST_UPDATE_RESPONSE,
            json!({"updated": [{
                "recipient_did": "did:example:a",
                "action": "add",
                "result": "no_change"
            }]}),
        );
        let MessageKind::KeylistUpdateResponse(body) = MessageKind::decode(&response).unwrap()
        else {
            panic!("expected a keylist-update-response");
        };
        assert_eq!(body.updated[0].result, KeylistUpdateResult::NoChange);
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        let other = Message::new("https://example.com/protocols/1.0/test", json!({}));
        assert_eq!(
            MessageKind::decode(&other).unwrap(),
            MessageKind::Unknown("https://example.com/protocols/1.0/test".to_string())
        );

        let bad = Message::new(KEYLIST_UPDATE, json!({"updates": "nope"}));
        assert!(matches!(MessageKind::decode(&bad), Err(Error::Protocol(_))));
    }
}
