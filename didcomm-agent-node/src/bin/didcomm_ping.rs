use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use didcomm_agent_core::LocalKeys;
use didcomm_agent_node::{AgentConfig, DIDCommAgent, HttpTransport};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Send a trust ping to the DID given on the command line.
///
/// `--wait` asks for a response and waits `DIDCOMM_PING_TIMEOUT_SECS` for
/// it; the answer only arrives if something feeds this agent's inbox, so by
/// default the ping is fire-and-forget.
#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let Some(target) = args.next() else {
        bail!("usage: didcomm-ping <did> [--wait]");
    };
    let wait = args.any(|arg| arg == "--wait");

    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    let ping_timeout: Duration = config.ping_timeout;
    let transport =
        Arc::new(HttpTransport::new(&config.dispatch).context("building HTTP transport")?);
    let agent = DIDCommAgent::new(config, Arc::new(LocalKeys::generate()), transport)
        .context("creating agent")?;
    info!(did = agent.did(), "Ephemeral identity");

    let handle = agent
        .trust_ping()
        .send_ping(&target, wait, None, ping_timeout)
        .await
        .with_context(|| format!("pinging {target}"))?;
    println!("ping {} sent to {target}", handle.id.as_str());

    if wait {
        let outcome = handle.outcome().await?;
        println!("{outcome:?}");
    }
    agent.dispose().await;
    Ok(())
}
