//! Composition root: constructs the cache, the adapter registry and the
//! engine parts, owns the startup sequence, and hands the API layer one
//! handle to everything.

use std::{sync::Arc, time::Instant};

use anyhow::{bail, Context};
use futures::future::join_all;
use ied_types::{
    AdapterHealth, AdapterSubscribeRequest, EngineError, Event, HealthResponse, PublishRequest,
    PublishResponse, StatsResponse, Status, SubscribeRequest, SubscribeResponse,
};

use crate::{
    adapter::AdapterRegistry,
    cache::{EventCache, MemoryEventCache, RedisEventCache},
    options::Options,
    publisher::Publisher,
    replication::Replicator,
    subscriptions::{Subscription, SubscriptionRegistry},
};

/// Handle set of a running engine. Cheap to clone; all state behind it is
/// shared and internally synchronized.
#[derive(Clone)]
pub struct BrokerContext {
    registry: Arc<AdapterRegistry>,
    cache: Arc<dyn EventCache>,
    publisher: Arc<Publisher>,
    replicator: Arc<Replicator>,
    subscriptions: Arc<SubscriptionRegistry>,
    degraded_cache: bool,
    started_at: Instant,
}

/// Bootstrap from configuration: connect the cache, resolve the adapter set,
/// then wire and start the engine.
pub async fn init_broker(opt: &Options) -> anyhow::Result<BrokerContext> {
    let (cache, degraded_cache): (Arc<dyn EventCache>, bool) =
        match RedisEventCache::connect(&opt.redis()).await {
            Ok(cache) => {
                tracing::info!(
                    host = %opt.redis_host,
                    port = opt.redis_port,
                    db = opt.redis_db,
                    "connected to redis"
                );
                (Arc::new(cache), false)
            },
            Err(err) if !opt.env.is_production() => {
                tracing::warn!(
                    "redis unavailable ({err}); continuing degraded on an in-memory cache"
                );
                (Arc::new(MemoryEventCache::default()), true)
            },
            Err(err) => return Err(err).context("connecting to redis"),
        };

    let registry = Arc::new(AdapterRegistry::new(opt.adapters()?, opt.retry_policy())?);
    BrokerContext::init(opt, cache, registry, degraded_cache).await
}

impl BrokerContext {
    /// Wire the engine together from pre-built parts, health-check the fleet
    /// and install the internal wildcard subscriptions.
    pub async fn init(
        opt: &Options,
        cache: Arc<dyn EventCache>,
        registry: Arc<AdapterRegistry>,
        degraded_cache: bool,
    ) -> anyhow::Result<Self> {
        let checks = join_all(registry.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            async move { (adapter.name().to_string(), adapter.health_check().await) }
        }))
        .await;
        for (name, up) in &checks {
            tracing::info!(adapter = %name, healthy = *up, "adapter health checked");
        }
        let healthy = checks.iter().filter(|(_, up)| *up).count();
        if healthy == 0 {
            if opt.env.is_production() {
                bail!("no healthy adapters at startup");
            }
            tracing::warn!("no healthy adapters at startup, continuing in {} mode", opt.env);
        } else {
            Self::install_internal_subscriptions(opt, &registry).await?;
        }

        let publisher = Arc::new(Publisher::new(Arc::clone(&registry), Arc::clone(&cache)));
        let replicator = Arc::new(Replicator::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            opt.replication_delay(),
        ));
        let subscriptions = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            opt.base_url()
                .join("internal/desmosNotification")
                .context("invalid IED base URL")?,
            opt.internal_subscription_metadata.clone(),
            opt.notification_timeout(),
        ));

        Ok(Self {
            registry,
            cache,
            publisher,
            replicator,
            subscriptions,
            degraded_cache,
            started_at: Instant::now(),
        })
    }

    /// Install the wildcard subscription on every adapter. The callback path
    /// encodes the adapter name, which is how replication learns the source
    /// of a notification without trusting the event body.
    async fn install_internal_subscriptions(
        opt: &Options,
        registry: &Arc<AdapterRegistry>,
    ) -> anyhow::Result<()> {
        let base = opt.base_url();
        let mut installs = Vec::with_capacity(registry.len());
        for adapter in registry.iter() {
            let endpoint = base
                .join(&format!("internal/eventNotification/{}", adapter.name()))
                .context("invalid IED base URL")?;
            let body = AdapterSubscribeRequest {
                event_types: opt.internal_subscription_event_types.clone(),
                notification_endpoint: endpoint,
                metadata: opt.internal_subscription_metadata.clone(),
            };
            let adapter = Arc::clone(adapter);
            installs.push(async move {
                let result = adapter.subscribe(&body).await;
                (adapter, result)
            });
        }
        for (adapter, result) in join_all(installs).await {
            match result {
                Ok(()) => {
                    tracing::info!(adapter = adapter.name(), "internal wildcard subscription installed")
                },
                Err(err) => tracing::warn!(
                    adapter = adapter.name(),
                    "internal subscription failed, its events will not flow until re-subscribed: {err}"
                ),
            }
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn EventCache> {
        &self.cache
    }

    pub async fn publish_event(
        &self,
        request: PublishRequest,
    ) -> Result<PublishResponse, EngineError> {
        self.publisher.publish_to_all(&request).await
    }

    pub async fn subscribe(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscribeResponse, EngineError> {
        self.subscriptions.subscribe(request).await
    }

    pub fn list_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.list()
    }

    /// Run replication for a ledger notification, detached from the webhook
    /// handler that accepted it.
    pub fn spawn_event_notification(&self, source_adapter: String, event: Event) {
        let replicator = Arc::clone(&self.replicator);
        tokio::spawn(async move {
            replicator.handle_incoming(event, &source_adapter).await;
        });
    }

    /// Run consumer dispatch for an inbound event, detached from the webhook
    /// handler that accepted it.
    pub fn spawn_consumer_notification(&self, event: Event) {
        let subscriptions = Arc::clone(&self.subscriptions);
        tokio::spawn(async move {
            subscriptions.handle_consumer_notification(event).await;
        });
    }

    pub async fn health(&self) -> HealthResponse {
        let adapters = join_all(self.registry.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            async move {
                AdapterHealth {
                    name: adapter.name().to_string(),
                    status: if adapter.health_check().await {
                        Status::Up
                    } else {
                        Status::Down
                    },
                }
            }
        }))
        .await;

        let redis = if !self.degraded_cache && self.cache.healthy().await {
            Status::Up
        } else {
            Status::Down
        };
        let any_adapter_up = adapters.iter().any(|adapter| adapter.status == Status::Up);
        let status = match (redis, any_adapter_up) {
            (Status::Up, true) => Status::Up,
            (Status::Down, false) => Status::Down,
            _ => Status::Degraded,
        };

        HealthResponse {
            status,
            redis,
            adapters,
            subscriptions: self.subscriptions.len(),
        }
    }

    pub async fn stats(&self) -> Result<StatsResponse, EngineError> {
        let cache = self.cache.stats(&self.registry.chain_ids()).await?;
        Ok(StatsResponse {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            subscriptions: self.subscriptions.len(),
            adapters: self.registry.identities(),
            cache,
        })
    }
}
