//! `DIDComm` v2 client agent runtime.
//!
//! This crate builds on `didcomm-agent-core` with everything that needs I/O
//! or time:
//!
//! - `resolver`: `did:key` decoding plus cached universal-resolver lookups
//! - `dispatch`: sign, encrypt and deliver over a pluggable [`Transport`]
//! - `trust_ping`: the Trust Ping state machine with per-ping timeouts
//! - `ping_first`: run an operation only after a successful ping
//! - `mediation`: Coordinate Mediation requests and keylist upkeep
//! - `node`: the [`DIDCommAgent`] that routes inbound envelopes
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use didcomm_agent_core::LocalKeys;
//! use didcomm_agent_node::{AgentConfig, DIDCommAgent, HttpTransport, MediationOutcome};
//!
//! async fn example(mediator: &str) -> didcomm_agent_node::Result<()> {
//!     let config = AgentConfig::default();
//!     let transport = Arc::new(HttpTransport::new(&config.dispatch)?);
//!     let agent = DIDCommAgent::new(config, Arc::new(LocalKeys::generate()), transport)?;
//!
//!     if let MediationOutcome::Granted(session) = agent.request_mediation(mediator, true).await? {
//!         println!("routing through {:?}", session.routing_keys);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod error;
pub mod mediation;
pub mod node;
pub mod ping_first;
pub mod resolver;
pub mod trust_ping;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod tests;

pub use dispatch::{DispatchConfig, Dispatcher, HttpTransport, Transport};
pub use error::{Error, Result};
pub use mediation::{MediationController, MediationOutcome, MediationSession};
pub use node::{AgentConfig, DIDCommAgent, Disposition, HandlerHandle};
pub use ping_first::PingFirst;
pub use resolver::CachingResolver;
pub use trust_ping::{PingHandle, PingOutcome, PingResponse, TrustPing};
