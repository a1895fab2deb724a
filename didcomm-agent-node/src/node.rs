//! The `DIDComm` agent.
//!
//! [`DIDCommAgent`] wires key custody, resolution, transport, Trust Ping and
//! mediation together and routes inbound envelopes:
//!
//! 1. decrypt and verify the enclosed message
//! 2. drop it if it is unverified or expired
//! 3. decode its [`MessageKind`] once and hand it to the protocol that owns
//!    it, or to handlers registered for its type
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use didcomm_agent_core::LocalKeys;
//! use didcomm_agent_node::{AgentConfig, DIDCommAgent, HttpTransport};
//!
//! async fn example() -> didcomm_agent_node::Result<()> {
//!     let config = AgentConfig::from_env()?;
//!     let transport = HttpTransport::new(&config.dispatch)?;
//!     let keys = Arc::new(LocalKeys::generate());
//!     let agent = DIDCommAgent::new(config, keys, Arc::new(transport))?;
//!
//!     if agent.ping("did:key:z6Mk...").await.is_ok() {
//!         println!("{} reached its peer", agent.did());
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use didcomm_agent_core::types::unix_now;
use didcomm_agent_core::{unpack_message, DIDResolver, KeyCustody, Message, MessageKind};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchConfig, Dispatcher, Transport};
use crate::error::{Error, Result};
use crate::mediation::{MediationController, MediationOutcome};
use crate::ping_first::PingFirst;
use crate::resolver::CachingResolver;
use crate::trust_ping::{PingOutcome, TrustPing};

/// Configuration for a `DIDComm` agent.
///
/// ```rust
/// use std::time::Duration;
/// use didcomm_agent_node::AgentConfig;
///
/// let config = AgentConfig {
///     ping_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Universal resolver base URL for non-`did:key` DIDs
    pub resolver_endpoint: Option<String>,
    /// Configuration for message dispatch
    pub dispatch: DispatchConfig,
    /// How long to wait for a ping response
    pub ping_timeout: Duration,
    /// How long to wait for a mediation grant or deny
    pub mediation_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            resolver_endpoint: None,
            dispatch: DispatchConfig::default(),
            ping_timeout: Duration::from_secs(30),
            mediation_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `DIDCOMM_RESOLVER_URL`, `DIDCOMM_ENDPOINT` and
    /// `DIDCOMM_PING_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is malformed or the
    /// result fails [`AgentConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = env::var("DIDCOMM_RESOLVER_URL") {
            config.resolver_endpoint = Some(url);
        }
        if let Ok(endpoint) = env::var("DIDCOMM_ENDPOINT") {
            config.dispatch.endpoint = Some(endpoint);
        }
        if let Ok(secs) = env::var("DIDCOMM_PING_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                Error::InvalidConfig(format!("DIDCOMM_PING_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config.ping_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check URLs parse and timeouts are non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("resolver endpoint", &self.resolver_endpoint),
            ("dispatch endpoint", &self.dispatch.endpoint),
        ] {
            if let Some(url) = url {
                reqwest::Url::parse(url)
                    .map_err(|e| Error::InvalidConfig(format!("{name} {url:?}: {e}")))?;
            }
        }
        if self.ping_timeout.is_zero() || self.mediation_timeout.is_zero() {
            return Err(Error::InvalidConfig("timeouts must be non-zero".into()));
        }
        if self.dispatch.timeout == 0 {
            return Err(Error::InvalidConfig("dispatch timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// A channel that receives messages of a registered type.
#[derive(Debug, Clone)]
pub struct HandlerHandle {
    tx: mpsc::Sender<Message>,
}

impl HandlerHandle {
    /// Wrap the sending half of a handler's queue.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    async fn deliver(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::Protocol("handler queue closed".into()))
    }
}

/// What the agent did with an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A ping was answered
    PingAnswered,
    /// A ping that wanted no answer was noted
    PingNoted,
    /// A pending ping was resolved
    PingResolved,
    /// A mediation reply was applied
    MediationApplied,
    /// Delivered to this many registered handlers
    Delivered(usize),
    /// Dropped without effect, with the reason
    Dropped(&'static str),
}

/// A `DIDComm` v2 client agent.
pub struct DIDCommAgent {
    config: AgentConfig,
    keys: Arc<dyn KeyCustody>,
    resolver: Arc<dyn DIDResolver>,
    dispatcher: Arc<Dispatcher>,
    trust_ping: Arc<TrustPing>,
    ping_first: PingFirst,
    mediation: MediationController,
    handlers: RwLock<HashMap<String, Vec<HandlerHandle>>>,
}

impl DIDCommAgent {
    /// Create an agent resolving through a [`CachingResolver`] built from
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: AgentConfig,
        keys: Arc<dyn KeyCustody>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let resolver = CachingResolver::new(
            config.resolver_endpoint.clone(),
            Duration::from_secs(config.dispatch.timeout),
        )?;
        Ok(Self::with_resolver(config, keys, Arc::new(resolver), transport))
    }

    /// Create an agent with a caller-supplied resolver.
    #[must_use]
    pub fn with_resolver(
        config: AgentConfig,
        keys: Arc<dyn KeyCustody>,
        resolver: Arc<dyn DIDResolver>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&keys),
            Arc::clone(&resolver),
            transport,
            config.dispatch.clone(),
        ));
        let trust_ping = Arc::new(TrustPing::new(Arc::clone(&dispatcher)));
        let ping_first = PingFirst::new(Arc::clone(&trust_ping));
        let mediation = MediationController::new(
            Arc::clone(&dispatcher),
            Arc::clone(&resolver),
            ping_first.clone(),
        );
        info!(did = keys.did(), "DIDComm agent created");

        Self {
            config,
            keys,
            resolver,
            dispatcher,
            trust_ping,
            ping_first,
            mediation,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// The agent's DID.
    #[must_use]
    pub fn did(&self) -> &str {
        self.keys.did()
    }

    /// Returns a reference to the agent's configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The Trust Ping state machine.
    #[must_use]
    pub fn trust_ping(&self) -> &TrustPing {
        &self.trust_ping
    }

    /// The ping-gated operation runner.
    #[must_use]
    pub fn ping_first(&self) -> &PingFirst {
        &self.ping_first
    }

    /// The mediation controller.
    #[must_use]
    pub fn mediation(&self) -> &MediationController {
        &self.mediation
    }

    /// Register a handler for a message type no built-in protocol owns.
    pub async fn register_handler(&self, msg_type: impl Into<String>, handler: HandlerHandle) {
        let msg_type = msg_type.into();
        self.handlers
            .write()
            .await
            .entry(msg_type.clone())
            .or_default()
            .push(handler);
        info!("Registered handler for message type: {msg_type}");
    }

    /// Ping `to_did` and wait for the answer using the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns the ping's send error, or [`Error::Disposed`].
    pub async fn ping(&self, to_did: &str) -> Result<PingOutcome> {
        self.trust_ping
            .send_ping(to_did, true, None, self.config.ping_timeout)
            .await?
            .outcome()
            .await
    }

    /// Request mediation using the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn request_mediation(
        &self,
        mediator_did: &str,
        verify_connectivity: bool,
    ) -> Result<MediationOutcome> {
        self.mediation
            .request_mediation(mediator_did, verify_connectivity, self.config.mediation_timeout)
            .await
    }

    /// Sign, encrypt and deliver `message` to its recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if packing or delivery fails.
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.dispatcher.dispatch(message).await
    }

    /// Process one inbound envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be opened or its body does
    /// not match its type. Untrusted messages are not errors; they are
    /// [`Disposition::Dropped`].
    pub async fn receive(&self, envelope: &Value) -> Result<Disposition> {
        let unpacked = unpack_message(envelope, self.keys.as_ref(), self.resolver.as_ref()).await?;
        let message = unpacked.message;

        if unpacked.signer.is_none() {
            warn!(
                message_id = message.id.as_str(),
                message_type = message.typ.as_str(),
                "Dropping unverified message"
            );
            return Ok(Disposition::Dropped("unverified"));
        }
        if message.is_expired_at(unix_now()) {
            warn!(message_id = message.id.as_str(), "Dropping expired message");
            return Ok(Disposition::Dropped("expired"));
        }

        let kind = MessageKind::decode(&message)?;
        debug!(
            message_id = message.id.as_str(),
            message_type = message.typ.as_str(),
            "Routing message"
        );

        match &kind {
            MessageKind::Ping(body) => {
                let answered = self.trust_ping.handle_ping(&message, body).await?;
                Ok(if answered.is_some() {
                    Disposition::PingAnswered
                } else {
                    Disposition::PingNoted
                })
            }
            MessageKind::PingResponse(_) => {
                Ok(if self.trust_ping.handle_ping_response(&message).await {
                    Disposition::PingResolved
                } else {
                    Disposition::Dropped("unmatched ping response")
                })
            }
            kind if kind.is_mediation() => {
                Ok(if self.mediation.handle_reply(&message, kind).await {
                    Disposition::MediationApplied
                } else {
                    Disposition::Dropped("unmatched mediation message")
                })
            }
            _ => self.deliver(message).await,
        }
    }

    async fn deliver(&self, message: Message) -> Result<Disposition> {
        let handlers = self
            .handlers
            .read()
            .await
            .get(message.typ.as_str())
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(message_type = message.typ.as_str(), "No handler registered");
            return Ok(Disposition::Dropped("no handler"));
        }

        let results = join_all(handlers.iter().map(|h| h.deliver(message.clone()))).await;
        let delivered = results
            .into_iter()
            .filter(|result| match result {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to send message to handler: {e}");
                    false
                }
            })
            .count();
        Ok(Disposition::Delivered(delivered))
    }

    /// Process one inbound envelope, logging instead of returning errors.
    pub async fn handle_incoming(&self, envelope: &Value) -> Option<Disposition> {
        match self.receive(envelope).await {
            Ok(disposition) => Some(disposition),
            Err(e) => {
                warn!("Dropping inbound message: {e}");
                None
            }
        }
    }

    /// Process envelopes from `inbox` until it closes.
    pub async fn serve(&self, mut inbox: mpsc::Receiver<Value>) {
        info!(did = self.did(), "Agent serving inbound messages");
        while let Some(envelope) = inbox.recv().await {
            self.handle_incoming(&envelope).await;
        }
        info!(did = self.did(), "Inbound queue closed");
    }

    /// Stop all pending pings and close observer streams.
    pub async fn dispose(&self) {
        self.trust_ping.dispose().await;
        info!(did = self.did(), "Agent disposed");
    }
}
