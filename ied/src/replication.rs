//! Replication of ledger events onto the ledgers that missed them.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use ied_types::{ChainId, Event, PublishRequest};

use crate::{adapter::AdapterRegistry, cache::EventCache};

/// Drives an inbound ledger notification through the replication pipeline:
/// mark the source, wait out the propagation window, compute the missing set,
/// fan out to whatever is still missing.
///
/// The wait is per invocation, not a debounce: every notification arms its own
/// timer, and near-simultaneous arrivals of the same event from sibling
/// ledgers mark the cache while the others sleep, shrinking each other's
/// missing set. Nothing here is persisted; an engine restart abandons
/// in-flight waits and the next notification for the id picks up the slack.
pub struct Replicator {
    registry: Arc<AdapterRegistry>,
    cache: Arc<dyn EventCache>,
    delay: Duration,
}

impl Replicator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        cache: Arc<dyn EventCache>,
        delay: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            delay,
        }
    }

    /// Handle one notification received from `source_adapter`.
    ///
    /// Infallible by design: this runs detached from the webhook handler that
    /// already acknowledged the adapter, so failures are logged and dropped.
    /// Cache failures abort the pass (replicating with stale knowledge risks
    /// a re-publication storm); per-target publish failures are abandoned and
    /// naturally retried when the next notification for the id arrives.
    pub async fn handle_incoming(&self, event: Event, source_adapter: &str) {
        let global_id = match event.global_id() {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(source_adapter, "dropping ledger notification: {err}");
                return;
            },
        };

        let source_chain = match self.registry.chain_id_of(source_adapter) {
            Some(chain) => chain.clone(),
            None => {
                tracing::warn!(
                    source_adapter,
                    %global_id,
                    "notification from unregistered adapter, using its name as chain id"
                );
                ChainId::from(source_adapter)
            },
        };

        if let Err(err) = self.cache.mark_published(&source_chain, &global_id).await {
            tracing::error!(
                %global_id,
                %source_chain,
                "cannot record source observation, aborting replication: {err}"
            );
            return;
        }
        tracing::debug!(%global_id, %source_chain, "observed event, waiting out the propagation window");

        tokio::time::sleep(self.delay).await;

        let candidates: Vec<ChainId> = self
            .registry
            .chain_ids()
            .into_iter()
            .filter(|chain| *chain != source_chain)
            .collect();
        let targets = match self.cache.missing_chains(&global_id, &candidates).await {
            Ok(targets) => targets,
            Err(err) => {
                tracing::error!(
                    %global_id,
                    "cannot compute missing chains, aborting replication: {err}"
                );
                return;
            },
        };
        if targets.is_empty() {
            tracing::debug!(%global_id, "event already on every chain, nothing to replicate");
            return;
        }
        tracing::info!(%global_id, ?targets, "replicating to missing chains");

        let body = PublishRequest::for_replication(&event);
        let dispatches = targets
            .iter()
            .filter_map(|chain| self.registry.for_chain(chain))
            .map(|adapter| {
                let adapter = Arc::clone(adapter);
                let body = &body;
                let global_id = &global_id;
                async move {
                    match adapter.publish(body).await {
                        Ok(_) => {
                            if let Err(err) =
                                self.cache.mark_published(adapter.chain_id(), global_id).await
                            {
                                tracing::error!(
                                    adapter = adapter.name(),
                                    %global_id,
                                    "replicated but cache marking failed: {err}"
                                );
                            }
                        },
                        Err(err) => {
                            tracing::warn!(
                                adapter = adapter.name(),
                                %global_id,
                                "replication publish failed: {err}"
                            );
                        },
                    }
                }
            });
        join_all(dispatches).await;
        tracing::debug!(%global_id, "replication dispatch finished");
    }
}

#[cfg(test)]
mod test {
    use ied_types::GlobalId;
    use ied_utils::test_utils::setup_test;
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    use super::*;
    use crate::{
        cache::MemoryEventCache,
        testing::{fast_policy, ledger_event, registry_of, MockAdapter},
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn an_event_is_replicated_to_the_missing_chain() {
        setup_test();
        let hashnet = MockAdapter::spawn("hashnet", "1").await;
        let alastria = MockAdapter::spawn("alastria", "2").await;
        let registry = registry_of(&[&hashnet, &alastria], fast_policy());
        let cache = Arc::new(MemoryEventCache::default());
        let replicator = Replicator::new(Arc::clone(&registry), cache.clone(), Duration::ZERO);

        let event = ledger_event("0xccc", "ProductAdded", Some("hashnet"));
        replicator.handle_incoming(event.clone(), "hashnet").await;

        // The source never receives its own event back.
        assert!(hashnet.records.publishes().is_empty());
        let replicated = alastria.records.publishes();
        assert_eq!(replicated.len(), 1);
        assert_eq!(replicated[0].data_location, event.data_location);
        assert_eq!(replicated[0].entity_id, event.entity_id_hash);

        let id = GlobalId::from("0xccc");
        assert!(cache.is_on_chain(&ChainId::from("1"), &id).await.unwrap());
        assert!(cache.is_on_chain(&ChainId::from("2"), &id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_arrivals_inside_the_window_suppress_each_other() {
        setup_test();
        let hashnet = MockAdapter::spawn("hashnet", "1").await;
        let alastria = MockAdapter::spawn("alastria", "2").await;
        let registry = registry_of(&[&hashnet, &alastria], fast_policy());
        let cache = Arc::new(MemoryEventCache::default());
        let replicator =
            Replicator::new(Arc::clone(&registry), cache.clone(), Duration::from_millis(400));

        // The same logical event arrives from both ledgers a beat apart, well
        // inside the propagation window of the first handler.
        let from_hashnet = ledger_event("0xaaa", "ProductAdded", Some("hashnet"));
        let from_alastria = ledger_event("0xaaa", "ProductAdded", Some("alastria"));
        tokio::join!(
            replicator.handle_incoming(from_hashnet, "hashnet"),
            async {
                sleep(Duration::from_millis(100)).await;
                replicator.handle_incoming(from_alastria, "alastria").await;
            }
        );

        // Both sources were marked immediately, so neither pass found a
        // missing chain.
        assert!(hashnet.records.publishes().is_empty());
        assert!(alastria.records.publishes().is_empty());

        let id = GlobalId::from("0xaaa");
        assert!(cache.is_on_chain(&ChainId::from("1"), &id).await.unwrap());
        assert!(cache.is_on_chain(&ChainId::from("2"), &id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn re_entrant_notifications_do_not_republish() {
        setup_test();
        let hashnet = MockAdapter::spawn("hashnet", "1").await;
        let alastria = MockAdapter::spawn("alastria", "2").await;
        let registry = registry_of(&[&hashnet, &alastria], fast_policy());
        let cache = Arc::new(MemoryEventCache::default());
        let replicator = Replicator::new(Arc::clone(&registry), cache.clone(), Duration::ZERO);

        let event = ledger_event("0xccc", "ProductAdded", Some("hashnet"));
        replicator.handle_incoming(event.clone(), "hashnet").await;
        assert_eq!(alastria.records.publishes().len(), 1);

        // The replicated copy comes back as a notification from the other
        // ledger; membership checks terminate the cycle.
        let echo = ledger_event("0xccc", "ProductAdded", Some("alastria"));
        replicator.handle_incoming(echo.clone(), "alastria").await;
        replicator.handle_incoming(echo, "alastria").await;

        assert!(hashnet.records.publishes().is_empty());
        assert_eq!(alastria.records.publishes().len(), 1);

        let id = GlobalId::from("0xccc");
        let stats = cache
            .stats(&[ChainId::from("1"), ChainId::from("2")])
            .await
            .unwrap();
        assert_eq!(stats.published[&ChainId::from("1")], 1);
        assert_eq!(stats.published[&ChainId::from("2")], 1);
        assert!(cache.is_on_chain(&ChainId::from("1"), &id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notifications_without_a_global_id_are_dropped() {
        setup_test();
        let hashnet = MockAdapter::spawn("hashnet", "1").await;
        let alastria = MockAdapter::spawn("alastria", "2").await;
        let registry = registry_of(&[&hashnet, &alastria], fast_policy());
        let cache = Arc::new(MemoryEventCache::default());
        let replicator = Replicator::new(Arc::clone(&registry), cache.clone(), Duration::ZERO);

        let mut event = ledger_event("0x0", "ProductAdded", Some("hashnet"));
        event.data_location = "https://example.com/ev?other=1".into();
        replicator.handle_incoming(event, "hashnet").await;

        assert!(alastria.records.publishes().is_empty());
        let stats = cache
            .stats(&[ChainId::from("1"), ChainId::from("2")])
            .await
            .unwrap();
        assert_eq!(stats.published[&ChainId::from("1")], 0);
    }
}
