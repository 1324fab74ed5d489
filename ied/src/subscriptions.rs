//! Consumer subscriptions and deduplicated notification dispatch.
//!
//! Subscriptions live in process and are lost on restart on purpose: the
//! internal wildcard subscriptions recreated at startup keep the adapters
//! flowing, and the consumer re-issues its own. The registry surface is
//! deliberately narrow so a persistent store could replace the map without
//! touching the dispatch path.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::future::join_all;
use ied_types::{
    AdapterOutcome, AdapterSubscribeRequest, EngineError, Event, SubscribeRequest,
    SubscribeResponse,
};
use parking_lot::RwLock;
use serde::Serialize;
use tide_disco::error::ServerError;
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

use crate::{adapter::AdapterRegistry, cache::EventCache, IedApiVersion};

/// One consumer subscription held in process.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub event_types: Vec<String>,
    pub callback_url: Url,
    /// Unix milliseconds.
    pub created_at: u64,
}

impl Subscription {
    /// An empty type set or a `*` entry matches everything.
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_types.is_empty()
            || self.event_types.iter().any(|t| t == "*" || t == event_type)
    }
}

pub struct SubscriptionRegistry {
    registry: Arc<AdapterRegistry>,
    cache: Arc<dyn EventCache>,
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
    /// The engine's own consumer-notification webhook; this, not the
    /// consumer's URL, is what gets installed on adapters.
    desmos_callback: Url,
    metadata: Vec<String>,
    notification_timeout: Duration,
}

impl SubscriptionRegistry {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        cache: Arc<dyn EventCache>,
        desmos_callback: Url,
        metadata: Vec<String>,
        notification_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            subscriptions: RwLock::new(HashMap::new()),
            desmos_callback,
            metadata,
            notification_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    pub fn list(&self) -> Vec<Subscription> {
        self.subscriptions.read().values().cloned().collect()
    }

    /// Register a consumer subscription and mirror it onto every adapter.
    ///
    /// Each mirrored subscription points at the engine's own webhook, so all
    /// ledger copies of an event funnel through the dedup gate before the
    /// consumer sees anything. The in-process record is kept on partial
    /// adapter success and dropped only when every install failed.
    pub async fn subscribe(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscribeResponse, EngineError> {
        let callback_url = request.validate()?;
        let id = Uuid::new_v4();
        let record = Subscription {
            id,
            event_types: request.event_types.clone(),
            callback_url,
            created_at: unix_millis(),
        };
        self.subscriptions.write().insert(id, record);

        let body = AdapterSubscribeRequest {
            event_types: request.event_types,
            notification_endpoint: self.desmos_callback.clone(),
            metadata: self.metadata.clone(),
        };
        let installs = self.registry.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let body = &body;
            async move {
                let result = adapter.subscribe(body).await;
                (adapter, result)
            }
        });
        let results = join_all(installs).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (adapter, result) in results {
            match result {
                Ok(()) => outcomes.push(AdapterOutcome::ok(adapter.name())),
                Err(err) => {
                    tracing::warn!(
                        adapter = adapter.name(),
                        subscription = %id,
                        "adapter subscription failed: {err}"
                    );
                    outcomes.push(AdapterOutcome::failure(adapter.name(), err.message()));
                },
            }
        }

        let installed = outcomes.iter().filter(|outcome| outcome.success).count();
        if installed == 0 {
            self.subscriptions.write().remove(&id);
            return Err(EngineError::AllAdaptersFailed);
        }

        tracing::info!(
            subscription = %id,
            installed,
            total = outcomes.len(),
            "consumer subscription registered"
        );
        Ok(SubscribeResponse {
            subscription_id: id,
            message: format!("subscription installed on {installed}/{} adapters", outcomes.len()),
            adapters: outcomes,
        })
    }

    /// Dispatch one inbound event to every matching consumer callback,
    /// at most once per global id per engine lifetime.
    ///
    /// The notified mark is written after all posts settle, regardless of
    /// their outcomes: a failed callback is the consumer's problem to retry
    /// through its own means, and never a reason to notify twice.
    pub async fn handle_consumer_notification(&self, event: Event) {
        let global_id = match event.global_id() {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!("dropping consumer notification: {err}");
                return;
            },
        };

        match self.cache.is_notified(&global_id).await {
            Ok(false) => {},
            Ok(true) => {
                tracing::debug!(%global_id, "consumer already notified, suppressing duplicate");
                return;
            },
            Err(err) => {
                tracing::error!(
                    %global_id,
                    "cannot check notification state, dropping dispatch: {err}"
                );
                return;
            },
        }

        let matching: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|subscription| subscription.matches(&event.event_type))
            .cloned()
            .collect();
        if matching.is_empty() {
            tracing::debug!(
                %global_id,
                event_type = %event.event_type,
                "no matching consumer subscriptions"
            );
            return;
        }

        let event = event.without_network();
        let posts = matching.iter().map(|subscription| {
            let event = &event;
            let global_id = &global_id;
            async move {
                match self.post_event(&subscription.callback_url, event).await {
                    Ok(()) => {
                        tracing::debug!(subscription = %subscription.id, %global_id, "consumer notified")
                    },
                    Err(err) => {
                        tracing::warn!(
                            subscription = %subscription.id,
                            callback = %subscription.callback_url,
                            %global_id,
                            "consumer notification failed: {err}"
                        )
                    },
                }
            }
        });
        join_all(posts).await;

        if let Err(err) = self.cache.mark_notified(&global_id).await {
            tracing::error!(%global_id, "cannot record consumer notification: {err}");
        }
    }

    async fn post_event(&self, callback: &Url, event: &Event) -> Result<(), EngineError> {
        let client = surf_disco::Client::<ServerError, IedApiVersion>::new(callback.clone());
        let request = client
            .post::<()>(callback.as_str())
            .body_json(event)
            .map_err(|err| EngineError::ConsumerWebhookFailed(err.to_string()))?;
        match timeout(self.notification_timeout, request.send()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(EngineError::ConsumerWebhookFailed(err.to_string())),
            Err(_) => Err(EngineError::ConsumerWebhookFailed(format!(
                "no response within {:?}",
                self.notification_timeout
            ))),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
