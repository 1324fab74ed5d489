//! Direct fan-out of consumer publications to every configured adapter.

use std::sync::Arc;

use futures::future::join_all;
use ied_types::{AdapterOutcome, EngineError, PublishRequest, PublishResponse};

use crate::{adapter::AdapterRegistry, cache::EventCache};

/// Fans a consumer publication out to the whole adapter fleet.
///
/// Partial success is success: the consumer's publish completes as soon as at
/// least one ledger carries the event, and replication repairs the rest. This
/// is what keeps publications live under partial adapter outages.
pub struct Publisher {
    registry: Arc<AdapterRegistry>,
    cache: Arc<dyn EventCache>,
}

impl Publisher {
    pub fn new(registry: Arc<AdapterRegistry>, cache: Arc<dyn EventCache>) -> Self {
        Self { registry, cache }
    }

    /// Publish `request` to every adapter concurrently and aggregate the
    /// per-adapter outcomes. Never short-circuits on the first failure.
    pub async fn publish_to_all(
        &self,
        request: &PublishRequest,
    ) -> Result<PublishResponse, EngineError> {
        let global_id = request.global_id()?;
        tracing::info!(
            %global_id,
            event_type = %request.event_type,
            adapters = self.registry.len(),
            "publishing event"
        );

        let calls = self.registry.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            async move {
                let result = adapter.publish(request).await;
                (adapter, result)
            }
        });
        let results = join_all(calls).await;

        let mut outcomes = Vec::with_capacity(results.len());
        let mut timestamp = None;
        for (adapter, result) in results {
            match result {
                Ok(ack) => {
                    // The ledger has the event either way; a failed marking
                    // self-heals when the next notification for this id is
                    // observed.
                    if let Err(err) =
                        self.cache.mark_published(adapter.chain_id(), &global_id).await
                    {
                        tracing::error!(
                            adapter = adapter.name(),
                            %global_id,
                            "publish succeeded but cache marking failed: {err}"
                        );
                    }
                    timestamp.get_or_insert(ack.timestamp);
                    outcomes.push(AdapterOutcome::success(adapter.name(), ack.timestamp));
                },
                Err(err) => {
                    tracing::warn!(adapter = adapter.name(), %global_id, "publish failed: {err}");
                    outcomes.push(AdapterOutcome::failure(adapter.name(), err.message()));
                },
            }
        }

        match timestamp {
            Some(timestamp) => Ok(PublishResponse {
                timestamp,
                adapters: outcomes,
            }),
            None => {
                tracing::error!(%global_id, "every adapter failed the publication");
                Err(EngineError::AllAdaptersFailed)
            },
        }
    }
}
