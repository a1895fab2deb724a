//! "Verify liveness, then proceed."
//!
//! An operation is run only after a Trust Ping round trip to the same DID
//! succeeds. A timed-out ping means the operation is never started.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::trust_ping::{PingOutcome, TrustPing};

/// Gate operations behind a successful ping.
#[derive(Clone)]
pub struct PingFirst {
    trust_ping: Arc<TrustPing>,
}

impl PingFirst {
    /// Gate through `trust_ping`.
    #[must_use]
    pub fn new(trust_ping: Arc<TrustPing>) -> Self {
        Self { trust_ping }
    }

    /// Ping `to_did` and run `operation` once if it answers within `timeout`.
    ///
    /// Returns `Ok(None)` when the ping timed out and `operation` was not run.
    ///
    /// # Errors
    ///
    /// Returns the ping's send error, or the operation's error.
    pub async fn execute_with_ping_check<T, F, Fut>(
        &self,
        to_did: &str,
        timeout: Duration,
        operation: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_ping_check_or(to_did, timeout, operation, || {})
            .await
    }

    /// Like [`PingFirst::execute_with_ping_check`], calling `on_timeout` when
    /// the ping goes unanswered.
    ///
    /// # Errors
    ///
    /// Returns the ping's send error, or the operation's error.
    pub async fn execute_with_ping_check_or<T, F, Fut, G>(
        &self,
        to_did: &str,
        timeout: Duration,
        operation: F,
        on_timeout: G,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        G: FnOnce(),
    {
        let handle = self
            .trust_ping
            .send_ping(to_did, true, None, timeout)
            .await?;

        match handle.outcome().await? {
            PingOutcome::Responded(_) => {
                debug!(did = to_did, "Peer is live, proceeding");
                operation().await.map(Some)
            }
            PingOutcome::TimedOut => {
                info!(did = to_did, "Peer did not answer ping, skipping operation");
                on_timeout();
                Ok(None)
            }
        }
    }
}
