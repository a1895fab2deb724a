use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use didcomm_agent_core::jwe::ContentEncryptionAlgorithm;
use didcomm_agent_core::protocol::{
    KeylistUpdateResponseBody, KeylistUpdateResult, KeylistUpdated, MessageKind,
    KEYLIST_UPDATE_RESPONSE, MEDIATE_DENY, TRUST_PING, TRUST_PING_RESPONSE,
};
use didcomm_agent_core::{
    pack_message, unpack_message, DIDResolver, KeyCustody, LocalKeys, Message,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::dispatch::{DispatchConfig, MockTransport, Transport};
use crate::mediation::{mediate_grant, MediationOutcome};
use crate::mock::{ChannelTransport, FailingTransport, Sent, SlowFailingTransport};
use crate::node::{AgentConfig, DIDCommAgent, Disposition, HandlerHandle};
use crate::resolver::CachingResolver;
use crate::trust_ping::PingOutcome;
use crate::Error;

/// Three `did:key` identities and a resolver that knows them.
pub struct KeyRing {
    alice: Arc<LocalKeys>,
    bob: Arc<LocalKeys>,
    mediator: Arc<LocalKeys>,
    resolver: Arc<CachingResolver>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self {
            alice: Arc::new(LocalKeys::generate()),
            bob: Arc::new(LocalKeys::generate()),
            mediator: Arc::new(LocalKeys::generate()),
            resolver: Arc::new(CachingResolver::offline()),
        }
    }

    pub fn alice(&self) -> Arc<LocalKeys> {
        Arc::clone(&self.alice)
    }

    pub fn bob(&self) -> Arc<LocalKeys> {
        Arc::clone(&self.bob)
    }

    pub fn mediator(&self) -> Arc<LocalKeys> {
        Arc::clone(&self.mediator)
    }

    pub fn resolver(&self) -> Arc<dyn DIDResolver> {
        self.resolver.clone()
    }

    pub fn agent(&self, keys: Arc<LocalKeys>, transport: Arc<dyn Transport>) -> Arc<DIDCommAgent> {
        let config = AgentConfig {
            dispatch: DispatchConfig {
                endpoint: Some("local://relay".to_string()),
                ..DispatchConfig::default()
            },
            ping_timeout: Duration::from_secs(1),
            mediation_timeout: Duration::from_secs(1),
            ..AgentConfig::default()
        };
        Arc::new(DIDCommAgent::with_resolver(config, keys, self.resolver(), transport))
    }

    /// An envelope from `from` to `to` as it would arrive off the wire.
    pub async fn envelope(&self, message: &Message, from: &LocalKeys, to: &LocalKeys) -> Value {
        let packed = pack_message(
            message,
            to.did(),
            from,
            self.resolver.as_ref(),
            ContentEncryptionAlgorithm::default(),
        )
        .await
        .unwrap();
        serde_json::from_str(&packed).unwrap()
    }
}

/// Deliver everything `outbox` receives to `agent`.
fn pump(mut outbox: mpsc::UnboundedReceiver<Sent>, agent: Arc<DIDCommAgent>) {
    tokio::spawn(async move {
        while let Some(sent) = outbox.recv().await {
            agent.handle_incoming(&sent.envelope).await;
        }
    });
}

#[tokio::test]
async fn test_ping_first_runs_operation_after_response() {
    let ring = KeyRing::new();
    let (alice_transport, alice_outbox) = ChannelTransport::new();
    let (bob_transport, bob_outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(alice_transport));
    let bob = ring.agent(ring.bob(), Arc::new(bob_transport));
    pump(alice_outbox, Arc::clone(&bob));
    pump(bob_outbox, Arc::clone(&alice));

    let mut responses = alice.trust_ping().subscribe_responses().await.unwrap();
    let calls = AtomicUsize::new(0);
    let result = alice
        .ping_first()
        .execute_with_ping_check(bob.did(), Duration::from_secs(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("executed")
        })
        .await
        .unwrap();

    assert_eq!(result, Some("executed"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let observed = responses.recv().await.unwrap();
    assert_eq!(observed.message.from.as_deref(), Some(bob.did()));
    assert_eq!(observed.message.thid.as_deref(), Some(observed.ping_id.as_str()));
    assert_eq!(alice.trust_ping().pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ping_first_skips_operation_on_timeout() {
    let ring = KeyRing::new();
    let (transport, _outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(transport));
    let mut timeouts = alice.trust_ping().subscribe_timeouts().await.unwrap();

    let calls = AtomicUsize::new(0);
    let timed_out = AtomicUsize::new(0);
    let result = alice
        .ping_first()
        .execute_with_ping_check_or(
            ring.bob().did(),
            Duration::from_secs(2),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            || {
                timed_out.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();

    assert_eq!(result, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(timed_out.load(Ordering::SeqCst), 1);
    assert!(timeouts.recv().await.is_ok());
    assert_eq!(alice.trust_ping().pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_after_timeout_is_ignored() {
    let ring = KeyRing::new();
    let (bob_keys, alice_keys) = (ring.bob(), ring.alice());
    let (transport, mut outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(transport));
    let mut responses = alice.trust_ping().subscribe_responses().await.unwrap();

    let handle = alice
        .trust_ping()
        .send_ping(bob_keys.did(), true, None, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(alice.trust_ping().is_pending(handle.id.as_str()).await);

    let sent = outbox.recv().await.unwrap();
    let ping = unpack_message(&sent.envelope, bob_keys.as_ref(), ring.resolver().as_ref())
        .await
        .unwrap()
        .message;
    assert_eq!(ping.typ.as_str(), TRUST_PING);

    assert_eq!(handle.outcome().await.unwrap(), PingOutcome::TimedOut);

    let late = Message::in_reply_to(&ping, TRUST_PING_RESPONSE, json!({}))
        .from(bob_keys.did())
        .to([alice_keys.did()]);
    assert!(!alice.trust_ping().handle_ping_response(&late).await);
    assert!(responses.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_response_cancels_timeout() {
    let ring = KeyRing::new();
    let bob_keys = ring.bob();
    let (transport, _outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(transport));
    let mut timeouts = alice.trust_ping().subscribe_timeouts().await.unwrap();

    let handle = alice
        .trust_ping()
        .send_ping(bob_keys.did(), true, Some("hello".into()), Duration::from_secs(1))
        .await
        .unwrap();

    let impostor = Message::new(TRUST_PING_RESPONSE, json!({}))
        .thid(handle.id.as_str())
        .from(ring.mediator().did());
    assert!(!alice.trust_ping().handle_ping_response(&impostor).await);

    let response = Message::new(TRUST_PING_RESPONSE, json!({}))
        .thid(handle.id.as_str())
        .from(bob_keys.did());
    assert!(alice.trust_ping().handle_ping_response(&response).await);
    assert!(!alice.trust_ping().handle_ping_response(&response).await);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(timeouts.try_recv().is_err());
    assert!(matches!(handle.outcome().await.unwrap(), PingOutcome::Responded(_)));
}

#[tokio::test]
async fn test_send_ping_validation_and_dispatch_failure() {
    let ring = KeyRing::new();
    let alice = ring.agent(ring.alice(), Arc::new(FailingTransport));

    for target in ["", "bob", "key:z6Mk"] {
        assert!(matches!(
            alice.trust_ping().send_ping(target, true, None, Duration::from_secs(1)).await,
            Err(Error::Protocol(_))
        ));
    }

    let result = alice
        .trust_ping()
        .send_ping(ring.bob().did(), true, None, Duration::from_secs(1))
        .await;
    assert!(matches!(result, Err(Error::Communication { .. })));
    assert_eq!(alice.trust_ping().pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_failed_dispatch_is_not_a_timeout() {
    let ring = KeyRing::new();
    let transport = SlowFailingTransport {
        delay: Duration::from_secs(3),
    };
    let alice = ring.agent(ring.alice(), Arc::new(transport));
    let mut timeouts = alice.trust_ping().subscribe_timeouts().await.unwrap();

    let result = alice
        .trust_ping()
        .send_ping(ring.bob().did(), true, None, Duration::from_secs(1))
        .await;
    assert!(matches!(result, Err(Error::Communication { .. })));
    assert_eq!(alice.trust_ping().pending_count().await, 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(timeouts.try_recv().is_err());
}

#[tokio::test]
async fn test_ping_without_response_requested() {
    let ring = KeyRing::new();
    let (transport, mut outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(transport));

    let handle = alice
        .trust_ping()
        .send_ping(ring.bob().did(), false, None, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(!handle.awaits_response());
    assert_eq!(alice.trust_ping().pending_count().await, 0);
    assert!(outbox.recv().await.is_some());
    assert!(matches!(handle.outcome().await, Err(Error::Protocol(_))));

    let bob = ring.agent(ring.bob(), Arc::new(FailingTransport));
    let quiet = Message::new(TRUST_PING, json!({"response_requested": false}))
        .from(ring.alice().did())
        .to([ring.bob().did()]);
    let envelope = ring.envelope(&quiet, &ring.alice(), &ring.bob()).await;
    assert_eq!(bob.receive(&envelope).await.unwrap(), Disposition::PingNoted);
}

#[tokio::test]
async fn test_dispose_abandons_pending_pings() {
    let ring = KeyRing::new();
    let (transport, _outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(transport));

    let handle = alice
        .trust_ping()
        .send_ping(ring.bob().did(), true, None, Duration::from_secs(30))
        .await
        .unwrap();
    alice.dispose().await;

    assert!(matches!(handle.outcome().await, Err(Error::Disposed)));
    assert!(alice.trust_ping().subscribe_responses().await.is_none());
    assert!(alice.trust_ping().subscribe_timeouts().await.is_none());
    assert!(matches!(
        alice.trust_ping().send_ping(ring.bob().did(), true, None, Duration::from_secs(1)).await,
        Err(Error::Disposed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_mediation_not_requested_when_mediator_unreachable() {
    let ring = KeyRing::new();
    let mut transport = MockTransport::new();
    // Only the connectivity ping may leave.
    transport.expect_send().times(1).returning(|_, _| Ok(()));
    let alice = ring.agent(ring.alice(), Arc::new(transport));

    let outcome = alice
        .mediation()
        .request_mediation(ring.mediator().did(), true, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(outcome, MediationOutcome::Unreachable);
    assert!(alice.mediation().session().await.is_none());
}

#[tokio::test]
async fn test_mediation_unreachable_when_ping_cannot_be_sent() {
    let ring = KeyRing::new();
    let alice = ring.agent(ring.alice(), Arc::new(FailingTransport));

    let outcome = alice
        .request_mediation(ring.mediator().did(), true)
        .await
        .unwrap();
    assert_eq!(outcome, MediationOutcome::Unreachable);

    assert!(matches!(
        alice.request_mediation(ring.mediator().did(), false).await,
        Err(Error::Communication { .. })
    ));
}

/// Play the mediator: answer pings through a real agent, grant or deny
/// mediation requests, and confirm keylist updates.
fn mediator_service(
    ring: &KeyRing,
    mut inbox: mpsc::UnboundedReceiver<Sent>,
    mediator: Arc<DIDCommAgent>,
    grant: bool,
) {
    let keys = ring.mediator();
    let resolver = ring.resolver();
    tokio::spawn(async move {
        while let Some(sent) = inbox.recv().await {
            let unpacked = unpack_message(&sent.envelope, keys.as_ref(), resolver.as_ref()).await;
            let Ok(unpacked) = unpacked else {
                continue;
            };
            let message = unpacked.message;
            let reply = match MessageKind::decode(&message) {
                Ok(MessageKind::MediateRequest) if grant => {
                    let routing = vec!["did:example:router".to_string()];
                    mediate_grant(&message, keys.did(), routing).unwrap()
                }
                Ok(MessageKind::MediateRequest) => {
                    Message::in_reply_to(&message, MEDIATE_DENY, json!({}))
                        .from(keys.did())
                        .to(message.from.clone())
                }
                Ok(MessageKind::KeylistUpdate(body)) => {
                    let updated = body
                        .updates
                        .into_iter()
                        .map(|update| KeylistUpdated {
                            recipient_did: update.recipient_did,
                            action: update.action,
                            result: KeylistUpdateResult::Success,
                        })
                        .collect();
                    Message::in_reply_to(
                        &message,
                        KEYLIST_UPDATE_RESPONSE,
                        json!(KeylistUpdateResponseBody { updated }),
                    )
                    .from(keys.did())
                    .to(message.from.clone())
                }
                _ => {
                    mediator.handle_incoming(&sent.envelope).await;
                    continue;
                }
            };
            mediator.send(&reply).await.unwrap();
        }
    });
}

#[tokio::test]
async fn test_mediation_grant_and_keylist_update() {
    let ring = KeyRing::new();
    let (alice_transport, alice_outbox) = ChannelTransport::new();
    let (mediator_transport, mediator_outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(alice_transport));
    let mediator = ring.agent(ring.mediator(), Arc::new(mediator_transport));
    mediator_service(&ring, alice_outbox, Arc::clone(&mediator), true);
    pump(mediator_outbox, Arc::clone(&alice));

    let outcome = alice
        .mediation()
        .request_mediation(mediator.did(), true, Duration::from_secs(5))
        .await
        .unwrap();
    let MediationOutcome::Granted(session) = outcome else {
        panic!("expected a grant, got {outcome:?}");
    };
    assert_eq!(session.mediator_did, mediator.did());
    assert_eq!(session.routing_keys, vec!["did:example:router".to_string()]);
    assert_eq!(alice.mediation().session().await, Some(session));

    alice
        .mediation()
        .update_keylist(&[alice.did().to_string()], &[])
        .await
        .unwrap();

    let mut registered = Vec::new();
    for _ in 0..100 {
        registered = alice.mediation().session().await.unwrap().recipient_keys;
        if !registered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registered, vec![alice.did().to_string()]);
}

#[tokio::test]
async fn test_mediation_denied() {
    let ring = KeyRing::new();
    let (alice_transport, alice_outbox) = ChannelTransport::new();
    let (mediator_transport, mediator_outbox) = ChannelTransport::new();
    let alice = ring.agent(ring.alice(), Arc::new(alice_transport));
    let mediator = ring.agent(ring.mediator(), Arc::new(mediator_transport));
    mediator_service(&ring, alice_outbox, Arc::clone(&mediator), false);
    pump(mediator_outbox, Arc::clone(&alice));

    let outcome = alice
        .mediation()
        .request_mediation(mediator.did(), false, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome, MediationOutcome::Denied);
    assert!(alice.mediation().session().await.is_none());
    assert!(matches!(
        alice.mediation().update_keylist(&[alice.did().to_string()], &[]).await,
        Err(Error::Protocol(_))
    ));
    assert!(matches!(
        alice.mediation().query_keylist(Some(10)).await,
        Err(Error::Protocol(_))
    ));
}

#[tokio::test]
async fn test_receive_drops_untrusted_messages() {
    let ring = KeyRing::new();
    let (alice_keys, bob_keys, mallory) = (ring.alice(), ring.bob(), ring.mediator());
    let bob = ring.agent(ring.bob(), Arc::new(FailingTransport));

    let forged = Message::new("https://example.com/protocols/1.0/hello", json!({}))
        .from(alice_keys.did())
        .to([bob_keys.did()]);
    let envelope = ring.envelope(&forged, &mallory, &bob_keys).await;
    assert_eq!(
        bob.receive(&envelope).await.unwrap(),
        Disposition::Dropped("unverified")
    );

    let mut expired = Message::new("https://example.com/protocols/1.0/hello", json!({}))
        .from(alice_keys.did())
        .to([bob_keys.did()]);
    expired.expires_time = Some(1);
    let envelope = ring.envelope(&expired, &alice_keys, &bob_keys).await;
    assert_eq!(bob.receive(&envelope).await.unwrap(), Disposition::Dropped("expired"));

    assert!(bob.receive(&json!({"not": "an envelope"})).await.is_err());
    assert!(bob.handle_incoming(&json!({"not": "an envelope"})).await.is_none());
}

#[tokio::test]
async fn test_receive_delivers_to_registered_handlers() {
    let ring = KeyRing::new();
    let (alice_keys, bob_keys) = (ring.alice(), ring.bob());
    let bob = ring.agent(ring.bob(), Arc::new(FailingTransport));

    let (tx, mut rx) = mpsc::channel(4);
    bob.register_handler("https://example.com/protocols/1.0/hello", HandlerHandle::new(tx))
        .await;

    let hello = Message::new("https://example.com/protocols/1.0/hello", json!({"text": "hi"}))
        .from(alice_keys.did())
        .to([bob_keys.did()]);
    let envelope = ring.envelope(&hello, &alice_keys, &bob_keys).await;
    assert_eq!(bob.receive(&envelope).await.unwrap(), Disposition::Delivered(1));

    let delivered = rx.recv().await.unwrap();
    assert_eq!(delivered.id, hello.id);
    assert_eq!(delivered.body, json!({"text": "hi"}));

    let other = Message::new("https://example.com/protocols/1.0/other", json!({}))
        .from(alice_keys.did())
        .to([bob_keys.did()]);
    let envelope = ring.envelope(&other, &alice_keys, &bob_keys).await;
    assert_eq!(bob.receive(&envelope).await.unwrap(), Disposition::Dropped("no handler"));
}

#[tokio::test]
async fn test_serve_answers_pings() {
    let ring = KeyRing::new();
    let (bob_transport, mut bob_outbox) = ChannelTransport::new();
    let bob = ring.agent(ring.bob(), Arc::new(bob_transport));

    let (inbox_tx, inbox_rx) = mpsc::channel(4);
    let server = Arc::clone(&bob);
    let serving = tokio::spawn(async move { server.serve(inbox_rx).await });

    let ping = Message::new(TRUST_PING, json!({}))
        .from(ring.alice().did())
        .to([bob.did()]);
    inbox_tx.send(ring.envelope(&ping, &ring.alice(), &ring.bob()).await).await.unwrap();
    inbox_tx.send(json!({"garbage": true})).await.unwrap();
    drop(inbox_tx);
    serving.await.unwrap();

    let sent = bob_outbox.recv().await.unwrap();
    assert_eq!(sent.endpoint, "local://relay");
    let response = unpack_message(&sent.envelope, ring.alice().as_ref(), ring.resolver().as_ref())
        .await
        .unwrap();
    assert_eq!(response.signer.as_deref(), Some(bob.did()));
    assert_eq!(response.message.typ.as_str(), TRUST_PING_RESPONSE);
    assert_eq!(response.message.thid.as_deref(), Some(ping.id.as_str()));
}
