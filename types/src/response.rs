use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::event::ChainId;

/// Outcome of one adapter call inside a fan-out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterOutcome {
    pub name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdapterOutcome {
    /// Success row for operations without an adapter timestamp (subscribe).
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            timestamp: None,
            error: None,
        }
    }

    pub fn success(name: impl Into<String>, timestamp: u64) -> Self {
        Self {
            name: name.into(),
            success: true,
            timestamp: Some(timestamp),
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            success: false,
            timestamp: None,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate result of a direct publication. Partial success is success: the
/// replicator repairs the ledgers that missed out.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub timestamp: u64,
    pub adapters: Vec<AdapterOutcome>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub subscription_id: Uuid,
    pub message: String,
    pub adapters: Vec<AdapterOutcome>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Up,
    Degraded,
    Down,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterHealth {
    pub name: String,
    pub status: Status,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: Status,
    pub redis: Status,
    pub adapters: Vec<AdapterHealth>,
    pub subscriptions: usize,
}

/// Per-chain published-set cardinalities plus the consumer-notification set
/// size.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub published: BTreeMap<ChainId, u64>,
    pub notified: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterIdentity {
    pub name: String,
    pub chain_id: ChainId,
    pub base_url: Url,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub subscriptions: usize,
    pub adapters: Vec<AdapterIdentity>,
    pub cache: CacheStats,
}
