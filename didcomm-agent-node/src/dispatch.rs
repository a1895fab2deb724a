//! Outbound delivery of `DIDComm` messages.
//!
//! The [`Dispatcher`] signs and encrypts a message once per recipient and
//! hands each envelope to a [`Transport`]. The recipient's endpoint comes
//! from its DID Document when the resolver knows one, otherwise from the
//! configured fallback endpoint.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use didcomm_agent_core::LocalKeys;
//! use didcomm_agent_node::dispatch::{DispatchConfig, Dispatcher, HttpTransport};
//! use didcomm_agent_node::resolver::CachingResolver;
//!
//! fn build() -> didcomm_agent_node::Result<Dispatcher> {
//!     let config = DispatchConfig::default();
//!     let transport = HttpTransport::new(&config)?;
//!     Ok(Dispatcher::new(
//!         Arc::new(LocalKeys::generate()),
//!         Arc::new(CachingResolver::offline()),
//!         Arc::new(transport),
//!         config,
//!     ))
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use didcomm_agent_core::jwe::header::ENCRYPTED_MEDIA_TYPE;
use didcomm_agent_core::jwe::ContentEncryptionAlgorithm;
use didcomm_agent_core::{pack_message, DIDResolver, KeyCustody, Message};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Configuration for message dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Endpoint used when a recipient advertises none
    pub endpoint: Option<String>,
    /// The HTTP client timeout in seconds
    pub timeout: u64,
    /// Content encryption for outbound envelopes
    pub content_encryption: ContentEncryptionAlgorithm,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: 30,
            content_encryption: ContentEncryptionAlgorithm::A256Gcm,
        }
    }
}

/// Moves packed envelopes to an endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `packed` to `endpoint`.
    async fn send(&self, endpoint: &str, packed: &str) -> Result<()>;
}

/// HTTP POST transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport using the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, packed: &str) -> Result<()> {
        debug!("Dispatching envelope to {endpoint}");

        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, ENCRYPTED_MEDIA_TYPE)
            .body(packed.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Communication {
                operation: "dispatch",
                target: endpoint.to_string(),
                reason: format!("endpoint returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Signs, encrypts and delivers messages on behalf of the local identity.
pub struct Dispatcher {
    keys: Arc<dyn KeyCustody>,
    resolver: Arc<dyn DIDResolver>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyCustody>,
        resolver: Arc<dyn DIDResolver>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            keys,
            resolver,
            transport,
            config,
        }
    }

    /// The local DID messages are sent from.
    #[must_use]
    pub fn did(&self) -> &str {
        self.keys.did()
    }

    /// Deliver `message` to each of its recipients.
    ///
    /// No retries: the first failure is returned and later recipients are
    /// not attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if the message has no recipients, a recipient key
    /// cannot be resolved, no endpoint is known, or the transport fails.
    pub async fn dispatch(&self, message: &Message) -> Result<()> {
        if message.to.is_empty() {
            return Err(Error::Protocol(format!(
                "message {} has no recipients",
                message.id.as_str()
            )));
        }

        for recipient in &message.to {
            let packed = pack_message(
                message,
                recipient,
                self.keys.as_ref(),
                self.resolver.as_ref(),
                self.config.content_encryption,
            )
            .await?;
            let endpoint = self.endpoint_for(recipient).await?;

            debug!(
                message_id = message.id.as_str(),
                message_type = message.typ.as_str(),
                did = recipient.as_str(),
                "Sending message"
            );
            if let Err(e) = self.transport.send(&endpoint, &packed).await {
                error!(
                    message_id = message.id.as_str(),
                    did = recipient.as_str(),
                    "Dispatch failed: {}",
                    e
                );
                return Err(e);
            }
        }
        Ok(())
    }

    async fn endpoint_for(&self, did: &str) -> Result<String> {
        if let Some(endpoint) = self.resolver.resolve_endpoint(did).await {
            return Ok(endpoint);
        }
        self.config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Communication {
                operation: "dispatch",
                target: did.to_string(),
                reason: "no service endpoint known".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::KeyRing;
    use didcomm_agent_core::unpack_message;
    use mockall::predicate::eq;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn test_http_transport_posts_envelope() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/didcomm"))
            .and(header("content-type", ENCRYPTED_MEDIA_TYPE))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&DispatchConfig::default()).unwrap();
        let endpoint = format!("{}/didcomm", mock_server.uri());
        assert!(transport.send(&endpoint, "{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_http_transport_rejects_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&DispatchConfig::default()).unwrap();
        let result = transport.send(&mock_server.uri(), "{}").await;
        assert!(matches!(result, Err(Error::Communication { operation: "dispatch", .. })));
    }

    #[tokio::test]
    async fn test_dispatch_packs_for_recipient() {
        let ring = KeyRing::new();
        let (alice, bob) = (ring.alice(), ring.bob());

        let mut transport = MockTransport::new();
        let (tx, rx) = std::sync::mpsc::channel();
        transport
            .expect_send()
            .with(eq("https://relay.example/didcomm"), mockall::predicate::always())
            .times(1)
            .returning(move |_, packed| {
                tx.send(packed.to_string()).unwrap();
                Ok(())
            });

        let config = DispatchConfig {
            endpoint: Some("https://relay.example/didcomm".to_string()),
            ..DispatchConfig::default()
        };
        let dispatcher =
            Dispatcher::new(alice.clone(), ring.resolver(), Arc::new(transport), config);

        let message = Message::new("https://example.com/protocols/1.0/hello", json!({"hi": true}))
            .from(alice.did())
            .to([bob.did()]);
        dispatcher.dispatch(&message).await.unwrap();

        let envelope: serde_json::Value = serde_json::from_str(&rx.recv().unwrap()).unwrap();
        let unpacked = unpack_message(&envelope, bob.as_ref(), ring.resolver().as_ref())
            .await
            .unwrap();
        assert_eq!(unpacked.signer.as_deref(), Some(alice.did()));
        assert_eq!(unpacked.message.id, message.id);
    }

    #[tokio::test]
    async fn test_dispatch_without_endpoint_or_recipient() {
        let ring = KeyRing::new();
        let alice = ring.alice();

        let mut transport = MockTransport::new();
        transport.expect_send().never();
        let dispatcher = Dispatcher::new(
            alice.clone(),
            ring.resolver(),
            Arc::new(transport),
            DispatchConfig::default(),
        );

        let no_recipient = Message::new("test", json!({})).from(alice.did());
        assert!(matches!(
            dispatcher.dispatch(&no_recipient).await,
            Err(Error::Protocol(_))
        ));

        let no_endpoint = Message::new("test", json!({}))
            .from(alice.did())
            .to([ring.bob().did()]);
        assert!(matches!(
            dispatcher.dispatch(&no_endpoint).await,
            Err(Error::Communication { .. })
        ));
    }
}
