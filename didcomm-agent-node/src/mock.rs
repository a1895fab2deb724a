use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::dispatch::Transport;
use crate::error::{Error, Result};

/// An envelope captured by [`ChannelTransport`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub endpoint: String,
    pub envelope: Value,
}

/// A transport that hands every envelope to a channel instead of the network.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Sent>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Sent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, endpoint: &str, packed: &str) -> Result<()> {
        let envelope = serde_json::from_str(packed)?;
        self.tx
            .send(Sent {
                endpoint: endpoint.to_string(),
                envelope,
            })
            .map_err(|_| Error::Communication {
                operation: "dispatch",
                target: endpoint.to_string(),
                reason: "channel closed".to_string(),
            })
    }
}

/// A transport whose every delivery fails.
#[derive(Debug, Clone, Default)]
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, endpoint: &str, _packed: &str) -> Result<()> {
        Err(Error::Communication {
            operation: "dispatch",
            target: endpoint.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

/// A transport that fails only after `delay`.
#[derive(Debug, Clone)]
pub struct SlowFailingTransport {
    pub delay: Duration,
}

#[async_trait]
impl Transport for SlowFailingTransport {
    async fn send(&self, endpoint: &str, _packed: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Err(Error::Communication {
            operation: "dispatch",
            target: endpoint.to_string(),
            reason: "connection reset".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_captures_envelopes() {
        let (transport, mut sent) = ChannelTransport::new();
        transport.send("local://bob", "{\"ciphertext\":\"x\"}").await.unwrap();

        let captured = sent.recv().await.unwrap();
        assert_eq!(captured.endpoint, "local://bob");
        assert_eq!(captured.envelope["ciphertext"], "x");

        assert!(FailingTransport.send("local://bob", "{}").await.is_err());
    }
}
