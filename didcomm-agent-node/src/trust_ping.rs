//! Trust Ping 2.0.
//!
//! Every ping that requests a response gets a pending entry holding a
//! single-fire slot and a timer. Whichever of the matching response or the
//! timer removes the entry from the table first resolves the slot; the other
//! finds nothing and does nothing. Observers can additionally subscribe to
//! broadcast streams of responses and timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use didcomm_agent_core::protocol::{PingBody, PingResponseBody, TRUST_PING, TRUST_PING_RESPONSE};
use didcomm_agent_core::{Message, MessageId};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};

const OBSERVER_CAPACITY: usize = 64;

/// How a ping round trip ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    /// The target answered
    Responded(Message),
    /// The timer fired first
    TimedOut,
}

/// A matched ping response, as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct PingResponse {
    /// The id of the ping that was answered
    pub ping_id: String,
    /// The response message
    pub message: Message,
}

/// A sent ping.
#[derive(Debug)]
pub struct PingHandle {
    /// Id of the ping message
    pub id: MessageId,
    outcome: Option<oneshot::Receiver<PingOutcome>>,
}

impl PingHandle {
    /// Whether a response was requested, and so an outcome will arrive.
    #[must_use]
    pub fn awaits_response(&self) -> bool {
        self.outcome.is_some()
    }

    /// Wait for the response or the timeout, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if no response was requested and
    /// [`Error::Disposed`] if the ping was abandoned by disposal.
    pub async fn outcome(self) -> Result<PingOutcome> {
        let Some(outcome) = self.outcome else {
            return Err(Error::Protocol(format!(
                "ping {} did not request a response",
                self.id.as_str()
            )));
        };
        outcome.await.map_err(|_| Error::Disposed)
    }
}

struct PendingPing {
    target: String,
    slot: oneshot::Sender<PingOutcome>,
    // None while the ping is still being dispatched.
    timer: Option<JoinHandle<()>>,
}

impl PendingPing {
    fn cancel_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

struct PingTable {
    pending: HashMap<String, PendingPing>,
    responses: Option<broadcast::Sender<PingResponse>>,
    timeouts: Option<broadcast::Sender<String>>,
}

impl PingTable {
    fn is_disposed(&self) -> bool {
        self.responses.is_none()
    }
}

/// The Trust Ping state machine.
pub struct TrustPing {
    dispatcher: Arc<Dispatcher>,
    table: Arc<Mutex<PingTable>>,
}

impl TrustPing {
    /// Create the state machine, sending through `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let (responses, _) = broadcast::channel(OBSERVER_CAPACITY);
        let (timeouts, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            dispatcher,
            table: Arc::new(Mutex::new(PingTable {
                pending: HashMap::new(),
                responses: Some(responses),
                timeouts: Some(timeouts),
            })),
        }
    }

    /// Send a ping to `to_did`.
    ///
    /// When a response is requested the pending entry exists before the ping
    /// leaves, so even an immediate response is matched. The timeout starts
    /// once the ping has been handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an invalid DID, [`Error::Disposed`]
    /// after [`TrustPing::dispose`], and any dispatch error. A failed dispatch
    /// leaves no pending entry behind and is never reported as a timeout.
    pub async fn send_ping(
        &self,
        to_did: &str,
        response_requested: bool,
        comment: Option<String>,
        timeout: Duration,
    ) -> Result<PingHandle> {
        if to_did.is_empty() || !to_did.starts_with("did:") {
            return Err(Error::Protocol(format!("invalid ping target {to_did:?}")));
        }

        let body = PingBody {
            response_requested,
            comment,
        };
        let ping = Message::new(TRUST_PING, serde_json::to_value(&body)?)
            .from(self.dispatcher.did())
            .to([to_did]);
        let id = ping.id.as_str().to_string();

        let outcome = if response_requested {
            Some(self.register(&id, to_did).await?)
        } else if self.table.lock().await.is_disposed() {
            return Err(Error::Disposed);
        } else {
            None
        };

        if let Err(e) = self.dispatcher.dispatch(&ping).await {
            self.forget(&id).await;
            return Err(e);
        }
        if response_requested {
            self.arm(&id, timeout).await;
        }
        debug!(message_id = id.as_str(), did = to_did, "Ping sent");

        Ok(PingHandle {
            id: ping.id,
            outcome,
        })
    }

    async fn register(&self, id: &str, target: &str) -> Result<oneshot::Receiver<PingOutcome>> {
        let mut table = self.table.lock().await;
        if table.is_disposed() {
            return Err(Error::Disposed);
        }

        let (slot, outcome) = oneshot::channel();
        table.pending.insert(
            id.to_string(),
            PendingPing {
                target: target.to_string(),
                slot,
                timer: None,
            },
        );
        Ok(outcome)
    }

    /// Start the timeout of a dispatched ping that is still pending.
    async fn arm(&self, id: &str, timeout: Duration) {
        let mut table = self.table.lock().await;
        // Spawned under the lock: the timer cannot look the entry up before
        // it is armed.
        if let Some(pending) = table.pending.get_mut(id) {
            let timer = tokio::spawn(expire(Arc::clone(&self.table), id.to_string(), timeout));
            pending.timer = Some(timer);
        }
    }

    async fn forget(&self, id: &str) {
        if let Some(pending) = self.table.lock().await.pending.remove(id) {
            pending.cancel_timer();
        }
    }

    /// Answer an inbound ping if it asks for a response.
    ///
    /// Returns the id of the response sent, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the ping has no sender, and any dispatch
    /// error.
    pub async fn handle_ping(&self, ping: &Message, body: &PingBody) -> Result<Option<MessageId>> {
        if !body.response_requested {
            debug!(message_id = ping.id.as_str(), "Ping does not request a response");
            return Ok(None);
        }
        let Some(sender) = ping.from.as_deref() else {
            return Err(Error::Protocol("cannot answer an anonymous ping".into()));
        };

        let response = Message::in_reply_to(
            ping,
            TRUST_PING_RESPONSE,
            serde_json::to_value(PingResponseBody::default())?,
        )
        .from(self.dispatcher.did())
        .to([sender]);

        self.dispatcher.dispatch(&response).await?;
        debug!(message_id = ping.id.as_str(), did = sender, "Answered ping");
        Ok(Some(response.id))
    }

    /// Match an inbound ping response against the pending table.
    ///
    /// Returns whether it resolved a pending ping. Responses for unknown,
    /// already settled, or differently addressed pings are ignored.
    pub async fn handle_ping_response(&self, response: &Message) -> bool {
        let Some(ping_id) = response.thid.as_deref() else {
            debug!(message_id = response.id.as_str(), "Ping response without thid");
            return false;
        };

        let mut table = self.table.lock().await;
        let expected_sender = table
            .pending
            .get(ping_id)
            .map(|pending| pending.target.as_str());
        match expected_sender {
            None => {
                debug!(ping_id, "No pending ping for response");
                return false;
            }
            Some(target) if response.from.as_deref() != Some(target) => {
                warn!(
                    ping_id,
                    did = target,
                    "Ping response from unexpected sender {:?}",
                    response.from
                );
                return false;
            }
            Some(_) => {}
        }

        let Some(pending) = table.pending.remove(ping_id) else {
            return false;
        };
        pending.cancel_timer();
        if let Some(responses) = &table.responses {
            let _ = responses.send(PingResponse {
                ping_id: ping_id.to_string(),
                message: response.clone(),
            });
        }
        let _ = pending.slot.send(PingOutcome::Responded(response.clone()));
        info!(ping_id, did = pending.target.as_str(), "Ping answered");
        true
    }

    /// Observe matched responses. `None` once disposed.
    pub async fn subscribe_responses(&self) -> Option<broadcast::Receiver<PingResponse>> {
        self.table
            .lock()
            .await
            .responses
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    /// Observe the ids of pings that timed out. `None` once disposed.
    pub async fn subscribe_timeouts(&self) -> Option<broadcast::Receiver<String>> {
        self.table
            .lock()
            .await
            .timeouts
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    /// Number of pings awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.pending.len()
    }

    /// Whether `ping_id` still awaits a response.
    pub async fn is_pending(&self, ping_id: &str) -> bool {
        self.table.lock().await.pending.contains_key(ping_id)
    }

    /// Cancel all timers, abandon pending pings, and close the observer
    /// streams. Later responses are ignored and new pings fail.
    pub async fn dispose(&self) {
        let mut table = self.table.lock().await;
        let abandoned = table.pending.len();
        for (_, pending) in table.pending.drain() {
            pending.cancel_timer();
        }
        table.responses = None;
        table.timeouts = None;
        info!(abandoned, "Trust ping disposed");
    }
}

async fn expire(table: Arc<Mutex<PingTable>>, ping_id: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;

    let mut table = table.lock().await;
    let Some(pending) = table.pending.remove(&ping_id) else {
        return;
    };
    if let Some(timeouts) = &table.timeouts {
        let _ = timeouts.send(ping_id.clone());
    }
    let _ = pending.slot.send(PingOutcome::TimedOut);
    warn!(
        ping_id = ping_id.as_str(),
        did = pending.target.as_str(),
        "Ping timed out"
    );
}
