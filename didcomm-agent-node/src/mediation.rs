//! Coordinate Mediation 2.0, recipient side.
//!
//! The controller asks a mediator to route for us, keeps the resulting
//! [`MediationSession`], and maintains the list of recipient DIDs the
//! mediator holds for us. Replies are only ever applied after the router has
//! verified their proof.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use didcomm_agent_core::protocol::{
    KeylistAction, KeylistBody, KeylistQueryBody, KeylistUpdate, KeylistUpdateBody,
    KeylistUpdateResponseBody, KeylistUpdateResult, MediateGrantBody, MessageKind, Paginate,
    KEYLIST_QUERY, KEYLIST_UPDATE, MEDIATE_GRANT, MEDIATE_REQUEST,
};
use didcomm_agent_core::{DIDResolver, Message, MessageId};
use serde_json::json;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::ping_first::PingFirst;

/// State of a granted mediation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediationSession {
    /// The mediator's DID
    pub mediator_did: String,
    /// DIDs senders must route through to reach us
    pub routing_keys: Vec<String>,
    /// The mediator's service endpoint, if it advertises one
    pub endpoint: Option<String>,
    /// Recipient DIDs the mediator has confirmed holding for us
    pub recipient_keys: Vec<String>,
}

impl MediationSession {
    /// Whether a mediator has granted us routing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.mediator_did.is_empty()
    }

    fn register(&mut self, did: &str) {
        if !self.recipient_keys.iter().any(|k| k == did) {
            self.recipient_keys.push(did.to_string());
        }
    }

    fn unregister(&mut self, did: &str) {
        self.recipient_keys.retain(|k| k != did);
    }
}

/// Result of a mediation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediationOutcome {
    /// The mediator granted routing
    Granted(MediationSession),
    /// The mediator refused
    Denied,
    /// The connectivity ping went unanswered or could not be sent; no
    /// request was made
    Unreachable,
    /// The request was sent but no grant or deny arrived in time
    NoReply,
}

/// A `mediate-request` from `from` to `mediator`.
#[must_use]
pub fn mediate_request(from: &str, mediator: &str) -> Message {
    Message::new(MEDIATE_REQUEST, json!({}))
        .from(from)
        .to([mediator])
}

/// A `mediate-grant` answering `request`.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized.
pub fn mediate_grant(request: &Message, from: &str, routing_did: Vec<String>) -> Result<Message> {
    let body = serde_json::to_value(MediateGrantBody { routing_did })?;
    let grant = Message::in_reply_to(request, MEDIATE_GRANT, body).from(from);
    Ok(match request.from.as_deref() {
        Some(requester) => grant.to([requester]),
        None => grant,
    })
}

/// A `keylist-update` adding then removing recipient DIDs.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized.
pub fn keylist_update(
    from: &str,
    mediator: &str,
    adds: &[String],
    removes: &[String],
) -> Result<Message> {
    let updates = adds
        .iter()
        .map(|did| (did, KeylistAction::Add))
        .chain(removes.iter().map(|did| (did, KeylistAction::Remove)))
        .map(|(did, action)| KeylistUpdate {
            recipient_did: did.clone(),
            action,
        })
        .collect();
    let body = serde_json::to_value(KeylistUpdateBody { updates })?;
    Ok(Message::new(KEYLIST_UPDATE, body).from(from).to([mediator]))
}

/// A `keylist-query`, optionally limited to `limit` entries.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized.
pub fn keylist_query(from: &str, mediator: &str, limit: Option<u32>) -> Result<Message> {
    let body = serde_json::to_value(KeylistQueryBody {
        paginate: limit.map(|limit| Paginate { limit, offset: 0 }),
    })?;
    Ok(Message::new(KEYLIST_QUERY, body).from(from).to([mediator]))
}

struct AwaitingReply {
    mediator: String,
    reply: oneshot::Sender<MediationOutcome>,
}

type AwaitingTable = StdMutex<HashMap<String, AwaitingReply>>;

fn lock(awaiting: &AwaitingTable) -> MutexGuard<'_, HashMap<String, AwaitingReply>> {
    awaiting.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request from the awaiting table when its wait ends, including
/// when the waiting future is dropped.
struct AwaitGuard<'a> {
    awaiting: &'a AwaitingTable,
    request_id: String,
}

impl Drop for AwaitGuard<'_> {
    fn drop(&mut self) {
        lock(self.awaiting).remove(&self.request_id);
    }
}

/// Drives mediation with one mediator at a time.
pub struct MediationController {
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<dyn DIDResolver>,
    ping_first: PingFirst,
    session: RwLock<Option<MediationSession>>,
    awaiting: AwaitingTable,
}

impl MediationController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<dyn DIDResolver>,
        ping_first: PingFirst,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            ping_first,
            session: RwLock::new(None),
            awaiting: StdMutex::new(HashMap::new()),
        }
    }

    /// The current session, if mediation was granted.
    pub async fn session(&self) -> Option<MediationSession> {
        self.session.read().await.clone()
    }

    /// Ask `mediator_did` to mediate for us and wait up to `timeout` for
    /// the answer.
    ///
    /// With `verify_connectivity` the request is only sent after a
    /// successful ping round trip, which gets its own `timeout`. A failed or
    /// unanswered ping yields [`MediationOutcome::Unreachable`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request itself cannot be sent.
    pub async fn request_mediation(
        &self,
        mediator_did: &str,
        verify_connectivity: bool,
        timeout: Duration,
    ) -> Result<MediationOutcome> {
        if !verify_connectivity {
            return self.send_request(mediator_did, timeout).await;
        }

        let gated = self
            .ping_first
            .execute_with_ping_check(mediator_did, timeout, move || async move {
                Ok(self.send_request(mediator_did, timeout).await)
            })
            .await;

        match gated {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                warn!(did = mediator_did, "Mediator unreachable, request not sent");
                Ok(MediationOutcome::Unreachable)
            }
            Err(e) => {
                warn!(did = mediator_did, "Connectivity check failed: {}", e);
                Ok(MediationOutcome::Unreachable)
            }
        }
    }

    async fn send_request(
        &self,
        mediator_did: &str,
        timeout: Duration,
    ) -> Result<MediationOutcome> {
        let request = mediate_request(self.dispatcher.did(), mediator_did);
        let request_id = request.id.as_str().to_string();

        let (reply, outcome) = oneshot::channel();
        lock(&self.awaiting).insert(
            request_id.clone(),
            AwaitingReply {
                mediator: mediator_did.to_string(),
                reply,
            },
        );
        let _guard = AwaitGuard {
            awaiting: &self.awaiting,
            request_id: request_id.clone(),
        };

        self.dispatcher.dispatch(&request).await?;
        info!(message_id = request_id.as_str(), did = mediator_did, "Mediation requested");

        match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::Disposed),
            Err(_) => {
                warn!(did = mediator_did, "No mediation reply within {:?}", timeout);
                Ok(MediationOutcome::NoReply)
            }
        }
    }

    /// Register and unregister recipient DIDs with the mediator.
    ///
    /// The session's key list changes when the mediator's response arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] without an active session, and any
    /// dispatch error.
    pub async fn update_keylist(&self, adds: &[String], removes: &[String]) -> Result<MessageId> {
        let mediator = self.active_mediator().await?;
        let update = keylist_update(self.dispatcher.did(), &mediator, adds, removes)?;
        self.dispatcher.dispatch(&update).await?;
        Ok(update.id)
    }

    /// Ask the mediator which recipient DIDs it holds for us.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] without an active session, and any
    /// dispatch error.
    pub async fn query_keylist(&self, limit: Option<u32>) -> Result<MessageId> {
        let mediator = self.active_mediator().await?;
        let query = keylist_query(self.dispatcher.did(), &mediator, limit)?;
        self.dispatcher.dispatch(&query).await?;
        Ok(query.id)
    }

    async fn active_mediator(&self) -> Result<String> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|session| session.is_active())
            .map(|session| session.mediator_did.clone())
            .ok_or_else(|| Error::Protocol("no active mediation session".into()))
    }

    /// Apply a verified coordinate-mediation message.
    ///
    /// Returns whether the message changed any state.
    pub async fn handle_reply(&self, message: &Message, kind: &MessageKind) -> bool {
        match kind {
            MessageKind::MediateGrant(body) => self.settle_request(message, Some(body)).await,
            MessageKind::MediateDeny => self.settle_request(message, None).await,
            MessageKind::KeylistUpdateResponse(body) => {
                self.apply_update_response(message, body).await
            }
            MessageKind::Keylist(body) => self.apply_keylist(message, body).await,
            other => {
                debug!(
                    message_id = message.id.as_str(),
                    "Ignoring mediator-side message {:?}", other
                );
                false
            }
        }
    }

    async fn settle_request(&self, message: &Message, grant: Option<&MediateGrantBody>) -> bool {
        let Some(thid) = message.thid.as_deref() else {
            debug!(message_id = message.id.as_str(), "Mediation reply without thid");
            return false;
        };

        let awaiting = {
            let mut awaiting = lock(&self.awaiting);
            let expected = awaiting.get(thid).map(|entry| entry.mediator.clone());
            match expected {
                Some(mediator) if message.from.as_deref() == Some(mediator.as_str()) => {
                    awaiting.remove(thid)
                }
                Some(mediator) => {
                    warn!(
                        did = mediator.as_str(),
                        "Mediation reply from unexpected sender {:?}", message.from
                    );
                    None
                }
                None => None,
            }
        };
        let Some(awaiting) = awaiting else {
            debug!(thid, "No pending mediation request for reply");
            return false;
        };

        let outcome = match grant {
            Some(body) => {
                let session = MediationSession {
                    mediator_did: awaiting.mediator.clone(),
                    routing_keys: body.routing_did.clone(),
                    endpoint: self.resolver.resolve_endpoint(&awaiting.mediator).await,
                    recipient_keys: Vec::new(),
                };
                *self.session.write().await = Some(session.clone());
                info!(did = awaiting.mediator.as_str(), "Mediation granted");
                MediationOutcome::Granted(session)
            }
            None => {
                info!(did = awaiting.mediator.as_str(), "Mediation denied");
                MediationOutcome::Denied
            }
        };
        let _ = awaiting.reply.send(outcome);
        true
    }

    async fn apply_update_response(
        &self,
        message: &Message,
        body: &KeylistUpdateResponseBody,
    ) -> bool {
        let mut session = self.session.write().await;
        let from_mediator = |s: &&mut MediationSession| {
            Some(s.mediator_did.as_str()) == message.from.as_deref()
        };
        let Some(session) = session.as_mut().filter(from_mediator) else {
            debug!(message_id = message.id.as_str(), "Keylist update response outside a session");
            return false;
        };

        use KeylistUpdateResult::{NoChange, Success};
        for updated in &body.updated {
            match (updated.action, updated.result) {
                (KeylistAction::Add, Success | NoChange) => {
                    session.register(&updated.recipient_did);
                }
                (KeylistAction::Remove, Success | NoChange) => {
                    session.unregister(&updated.recipient_did);
                }
                (action, result) => warn!(
                    did = updated.recipient_did.as_str(),
                    "Keylist {:?} rejected: {:?}", action, result
                ),
            }
        }
        true
    }

    async fn apply_keylist(&self, message: &Message, body: &KeylistBody) -> bool {
        let mut session = self.session.write().await;
        let from_mediator = |s: &&mut MediationSession| {
            Some(s.mediator_did.as_str()) == message.from.as_deref()
        };
        let Some(session) = session.as_mut().filter(from_mediator) else {
            debug!(message_id = message.id.as_str(), "Keylist outside a session");
            return false;
        };
        for key in &body.keys {
            session.register(&key.recipient_did);
        }
        true
    }
}
