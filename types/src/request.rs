use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::EngineError,
    event::{extract_global_id, Bytes32Hex, Event, GlobalId},
};

/// Body of a direct publication from the consumer.
///
/// Fan-out forwards this body verbatim to every adapter; replication rebuilds
/// it from a ledger event via [`PublishRequest::for_replication`]. There is no
/// `network` field here, so nothing replicated can ever carry the source tag
/// back onto a ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub event_type: String,
    pub data_location: String,
    #[serde(default)]
    pub relevant_metadata: Vec<String>,
    pub entity_id: Bytes32Hex,
    pub previous_entity_hash: Bytes32Hex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_address: Option<String>,
}

impl PublishRequest {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.event_type.trim().is_empty() {
            return Err(EngineError::Validation("eventType must not be empty".into()));
        }
        Url::parse(&self.data_location)
            .map_err(|err| EngineError::Validation(format!("dataLocation is not a valid URL: {err}")))?;
        Ok(())
    }

    /// The publication envelope for replicating `event` onto a ledger that
    /// missed it. The `dataLocation` is carried exactly as received.
    pub fn for_replication(event: &Event) -> Self {
        Self {
            event_type: event.event_type.clone(),
            data_location: event.data_location.clone(),
            relevant_metadata: event.relevant_metadata.clone(),
            entity_id: event.entity_id_hash.clone(),
            previous_entity_hash: event.previous_entity_hash.clone(),
            iss: None,
            rpc_address: None,
        }
    }

    pub fn global_id(&self) -> Result<GlobalId, EngineError> {
        extract_global_id(&self.data_location)
    }
}

/// Body of a consumer subscription request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Event types to match; `"*"` subscribes to everything.
    pub event_types: Vec<String>,
    /// Webhook the consumer wants events delivered to.
    pub notification_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl SubscribeRequest {
    pub fn validate(&self) -> Result<Url, EngineError> {
        if self.event_types.is_empty() {
            return Err(EngineError::Validation("eventTypes must not be empty".into()));
        }
        if self.event_types.iter().any(|t| t.trim().is_empty()) {
            return Err(EngineError::Validation(
                "eventTypes must not contain empty entries".into(),
            ));
        }
        Url::parse(&self.notification_endpoint).map_err(|err| {
            EngineError::Validation(format!("notificationEndpoint is not a valid URL: {err}"))
        })
    }
}

/// Subscription the engine installs on an adapter. The callback always points
/// back at the engine itself, never at the consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSubscribeRequest {
    pub event_types: Vec<String>,
    pub notification_endpoint: Url,
    #[serde(default)]
    pub metadata: Vec<String>,
}

/// Acknowledgement from an adapter publish endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PublishAck {
    #[serde(default)]
    pub timestamp: u64,
}

/// Body of an adapter health probe response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HealthAck {
    #[serde(default)]
    pub status: String,
}

impl HealthAck {
    pub fn is_up(&self) -> bool {
        self.status == "UP"
    }

    pub fn up() -> Self {
        Self { status: "UP".into() }
    }
}
