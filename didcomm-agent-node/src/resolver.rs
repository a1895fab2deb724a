//! Caching DID resolver.
//!
//! `did:key` DIDs are decoded locally. Anything else is fetched from a
//! universal-resolver style HTTP endpoint (`GET {endpoint}/{did}`). Successful
//! resolutions are cached for the resolver's lifetime; failures are never
//! cached, so a later call retries.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use didcomm_agent_core::did::{
    decode_did_key, extract_key_agreement_key, extract_public_key, extract_service_endpoint,
    is_did_key, PublicKey,
};
use didcomm_agent_core::DIDResolver;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Everything learned about one DID.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDid {
    /// Verification key
    pub public_key: PublicKey,
    /// Declared key agreement key, if separate from the verification key
    pub key_agreement: Option<PublicKey>,
    /// DIDComm service endpoint
    pub endpoint: Option<String>,
}

impl ResolvedDid {
    fn from_document(document: &Value) -> Option<Self> {
        Some(Self {
            public_key: extract_public_key(document)?,
            key_agreement: extract_key_agreement_key(document),
            endpoint: extract_service_endpoint(document),
        })
    }
}

/// A [`DIDResolver`] with a process-lifetime cache.
pub struct CachingResolver {
    endpoint: Option<String>,
    client: Client,
    cache: RwLock<HashMap<String, ResolvedDid>>,
}

impl CachingResolver {
    /// A resolver that fetches non-`did:key` DIDs from `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            client,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// A resolver that only understands `did:key`.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            endpoint: None,
            client: Client::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `did`, consulting the cache first.
    pub async fn resolve_did(&self, did: &str) -> Option<ResolvedDid> {
        if let Some(hit) = self.cache.read().await.get(did) {
            debug!(did, "Resolver cache hit");
            return Some(hit.clone());
        }

        let resolved = match self.fetch(did).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(did, "DID resolution failed: {}", e);
                return None;
            }
        };

        // First writer wins so concurrent resolutions agree.
        let mut cache = self.cache.write().await;
        Some(cache.entry(did.to_string()).or_insert(resolved).clone())
    }

    /// Forget every cached resolution.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    /// DIDs currently in the cache.
    pub async fn cached_dids(&self) -> Vec<String> {
        self.cache.read().await.keys().cloned().collect()
    }

    async fn fetch(&self, did: &str) -> Result<ResolvedDid> {
        if is_did_key(did) {
            let public_key = decode_did_key(did)?;
            return Ok(ResolvedDid {
                public_key,
                key_agreement: None,
                endpoint: None,
            });
        }

        let Some(endpoint) = &self.endpoint else {
            return Err(Error::Protocol(format!(
                "no resolver endpoint configured for {did}"
            )));
        };
        let url = format!("{endpoint}/{did}");
        debug!(did, url = %url, "Fetching DID document");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Communication {
                operation: "resolve",
                target: did.to_string(),
                reason: format!("resolver returned {}", response.status()),
            });
        }

        let body: Value = response.json().await?;
        // Universal resolvers wrap the document in a resolution result.
        let document = body.get("didDocument").unwrap_or(&body);
        ResolvedDid::from_document(document).ok_or_else(|| {
            Error::Protocol(format!("DID document for {did} has no usable key"))
        })
    }
}

#[async_trait]
impl DIDResolver for CachingResolver {
    async fn resolve(&self, did: &str) -> Option<PublicKey> {
        self.resolve_did(did).await.map(|r| r.public_key)
    }

    async fn resolve_key_agreement(&self, did: &str) -> Option<PublicKey> {
        self.resolve_did(did)
            .await
            .map(|r| r.key_agreement.unwrap_or(r.public_key))
    }

    async fn resolve_endpoint(&self, did: &str) -> Option<String> {
        self.resolve_did(did).await.and_then(|r| r.endpoint)
    }
}
