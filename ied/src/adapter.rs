//! Typed HTTP clients for ledger adapters and the registry that owns them.

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use displaydoc::Display;
use ied_types::{
    AdapterIdentity, AdapterSubscribeRequest, ChainId, EngineError, HealthAck, PublishAck,
    PublishRequest,
};
use serde::de::DeserializeOwned;
use tide_disco::{error::ServerError, Error as _};
use tokio::time::{sleep, timeout};
use url::Url;

use crate::IedApiVersion;

/// Identity and location of one configured adapter.
#[derive(Clone, Debug)]
pub struct AdapterDescriptor {
    pub name: String,
    pub base_url: Url,
    pub chain_id: ChainId,
}

impl AdapterDescriptor {
    pub fn new(name: impl Into<String>, base_url: Url, chain_id: Option<ChainId>) -> Self {
        let name = name.into();
        let chain_id = chain_id.unwrap_or_else(|| {
            tracing::warn!(
                adapter = %name,
                "no chain id configured, falling back to the adapter name as cache key"
            );
            ChainId::from(name.as_str())
        });
        Self {
            name,
            base_url: normalize_base_url(base_url),
            chain_id,
        }
    }

    /// Read `<PREFIX>_ADAPTER_URL`, `<PREFIX>_ADAPTER_NAME` and
    /// `<PREFIX>_CHAIN_ID` from the process environment.
    pub fn from_env(prefix: &str) -> anyhow::Result<Self> {
        let key = prefix.to_uppercase().replace('-', "_");

        let url_var = format!("{key}_ADAPTER_URL");
        let base_url: Url = std::env::var(&url_var)
            .with_context(|| format!("{url_var} is not set"))?
            .parse()
            .with_context(|| format!("{url_var} is not a valid URL"))?;

        let name = std::env::var(format!("{key}_ADAPTER_NAME"))
            .unwrap_or_else(|_| prefix.to_lowercase());
        let chain_id = std::env::var(format!("{key}_CHAIN_ID"))
            .ok()
            .map(ChainId::from);

        Ok(Self::new(name, base_url, chain_id))
    }
}

/// Route joining silently drops the last path segment of a base URL without a
/// trailing slash, so descriptors always store one.
fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Retry budget of a single adapter invocation.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Base delay; attempt `n` waits `retry_delay * n` before retrying.
    pub retry_delay: Duration,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Display)]
pub enum AdapterError {
    /// adapter `{0}` rejected the request: {1}
    Rejected(String, String),
    /// adapter `{0}` is unavailable: {1}
    Unavailable(String, String),
}

impl AdapterError {
    /// Terminal failures are not retried: the adapter understood the request
    /// and said no.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(..))
    }

    /// The adapter-reported message, without the engine-side prefix. This is
    /// what fan-out callers surface in per-adapter outcome rows.
    pub fn message(&self) -> &str {
        match self {
            Self::Rejected(_, message) | Self::Unavailable(_, message) => message,
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<AdapterError> for EngineError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Rejected(name, message) => EngineError::AdapterRejected(name, message),
            AdapterError::Unavailable(name, message) => {
                EngineError::AdapterUnavailable(name, message)
            },
        }
    }
}

/// HTTP client for one ledger adapter.
///
/// Every operation is bounded by the per-attempt timeout; publish and
/// subscribe additionally retry transient failures with linear backoff. The
/// client never panics into a caller: exhausted budgets come back as
/// [`AdapterError`] values.
pub struct AdapterClient {
    descriptor: AdapterDescriptor,
    client: surf_disco::Client<ServerError, IedApiVersion>,
    policy: RetryPolicy,
}

impl AdapterClient {
    pub fn new(descriptor: AdapterDescriptor, policy: RetryPolicy) -> Self {
        let client = surf_disco::Client::new(descriptor.base_url.clone());
        Self {
            descriptor,
            client,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.descriptor.chain_id
    }

    pub fn identity(&self) -> AdapterIdentity {
        AdapterIdentity {
            name: self.descriptor.name.clone(),
            chain_id: self.descriptor.chain_id.clone(),
            base_url: self.descriptor.base_url.clone(),
        }
    }

    /// `GET health`. Healthy only on a 200 whose body says `status == "UP"`.
    pub async fn health_check(&self) -> bool {
        let probe = self.client.get::<HealthAck>("health").send();
        match timeout(self.policy.request_timeout, probe).await {
            Ok(Ok(ack)) => ack.is_up(),
            Ok(Err(err)) => {
                tracing::debug!(adapter = self.name(), "health check failed: {err}");
                false
            },
            Err(_) => {
                tracing::debug!(adapter = self.name(), "health check timed out");
                false
            },
        }
    }

    /// `POST publish`, retried per policy.
    pub async fn publish(&self, body: &PublishRequest) -> Result<PublishAck, AdapterError> {
        self.with_retry("publish", || async {
            let request = self
                .client
                .post::<PublishAck>("publish")
                .body_json(body)
                .map_err(|err| self.classify(err))?;
            self.send(request).await
        })
        .await
    }

    /// `POST subscribe`, retried per policy.
    pub async fn subscribe(&self, body: &AdapterSubscribeRequest) -> Result<(), AdapterError> {
        self.with_retry("subscribe", || async {
            let request = self
                .client
                .post::<()>("subscribe")
                .body_json(body)
                .map_err(|err| self.classify(err))?;
            self.send(request).await.map(|_| ())
        })
        .await
    }

    /// `GET subscribe`: the subscriptions the adapter holds. Diagnostic; not
    /// retried.
    pub async fn list_subscriptions(&self) -> Result<Vec<serde_json::Value>, AdapterError> {
        let request = self.client.get::<Vec<serde_json::Value>>("subscribe");
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: surf_disco::Request<T, ServerError, IedApiVersion>,
    ) -> Result<T, AdapterError> {
        match timeout(self.policy.request_timeout, request.send()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.classify(err)),
            Err(_) => Err(AdapterError::Unavailable(
                self.name().into(),
                format!("no response within {:?}", self.policy.request_timeout),
            )),
        }
    }

    fn classify(&self, err: ServerError) -> AdapterError {
        if err.status().is_client_error() {
            AdapterError::Rejected(self.name().into(), err.to_string())
        } else {
            AdapterError::Unavailable(self.name().into(), err.to_string())
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, call: F) -> Result<T, AdapterError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => {
                    if attempt >= self.policy.max_attempts {
                        tracing::warn!(
                            adapter = self.name(),
                            op,
                            attempt,
                            "retry budget exhausted: {err}"
                        );
                        return Err(err);
                    }
                    let backoff = self.policy.retry_delay * attempt as u32;
                    tracing::debug!(
                        adapter = self.name(),
                        op,
                        attempt,
                        ?backoff,
                        "retrying after transient error: {err}"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                },
            }
        }
    }
}

/// Immutable, ordered collection of the configured adapters.
pub struct AdapterRegistry {
    adapters: Vec<Arc<AdapterClient>>,
}

impl AdapterRegistry {
    /// Fails fast when no adapters are configured or identities collide.
    pub fn new(descriptors: Vec<AdapterDescriptor>, policy: RetryPolicy) -> anyhow::Result<Self> {
        if descriptors.is_empty() {
            bail!("no adapters configured");
        }
        let mut names = HashSet::new();
        let mut chains = HashSet::new();
        for descriptor in &descriptors {
            if !names.insert(descriptor.name.clone()) {
                bail!("duplicate adapter name `{}`", descriptor.name);
            }
            if !chains.insert(descriptor.chain_id.clone()) {
                bail!("duplicate chain id `{}`", descriptor.chain_id);
            }
        }
        Ok(Self {
            adapters: descriptors
                .into_iter()
                .map(|descriptor| Arc::new(AdapterClient::new(descriptor, policy)))
                .collect(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AdapterClient>> {
        self.adapters.iter()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<AdapterClient>> {
        self.adapters.iter().find(|adapter| adapter.name() == name)
    }

    pub fn for_chain(&self, chain: &ChainId) -> Option<&Arc<AdapterClient>> {
        self.adapters.iter().find(|adapter| adapter.chain_id() == chain)
    }

    pub fn chain_id_of(&self, name: &str) -> Option<&ChainId> {
        self.get(name).map(|adapter| adapter.chain_id())
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.adapters
            .iter()
            .map(|adapter| adapter.chain_id().clone())
            .collect()
    }

    pub fn identities(&self) -> Vec<AdapterIdentity> {
        self.adapters.iter().map(|adapter| adapter.identity()).collect()
    }
}
