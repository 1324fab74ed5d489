use std::str::FromStr;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::EngineError;

/// Logical identity of an event across every ledger: the value of the `hl`
/// query parameter of its `dataLocation`.
#[derive(
    Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into, Serialize, Deserialize,
)]
pub struct GlobalId(String);

impl GlobalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GlobalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Stable identifier of one adapter's ledger; the cache key suffix.
///
/// Configured per adapter, so the cache layout survives engine restarts even
/// if adapter display names change.
#[derive(
    Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into, Serialize, Deserialize,
)]
pub struct ChainId(String);

impl ChainId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A 32-byte identifier carried as `0x`-prefixed lowercase hex, 66 characters
/// total. Mixed-case input is accepted and normalized on parse.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bytes32Hex(String);

impl Bytes32Hex {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Bytes32Hex {
    type Err = InvalidHexHash;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let digits = value
            .strip_prefix("0x")
            .ok_or_else(|| InvalidHexHash(value.to_string()))?;
        if digits.len() != 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidHexHash(value.to_string()));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Bytes32Hex {
    type Error = InvalidHexHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bytes32Hex> for String {
    fn from(value: Bytes32Hex) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, Display)]
#[display("`{_0}` is not a 0x-prefixed 32-byte hex string")]
pub struct InvalidHexHash(pub String);

impl std::error::Error for InvalidHexHash {}

impl From<InvalidHexHash> for EngineError {
    fn from(err: InvalidHexHash) -> Self {
        EngineError::Validation(err.to_string())
    }
}

/// The unit distributed across ledgers.
///
/// Adapters disagree slightly on the notification shape across versions, so
/// deserialization is tolerant: counters default to zero and the publisher
/// address also accepts the legacy `origin` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Sequence number assigned by the origin adapter.
    #[serde(default)]
    pub id: u64,
    /// Adapter-assigned publication timestamp.
    #[serde(default)]
    pub timestamp: u64,
    /// Logical channel of the event.
    pub event_type: String,
    /// URL of the event payload; its `hl` query parameter is the global id.
    pub data_location: String,
    /// Environment / categorical filter tags.
    #[serde(default)]
    pub relevant_metadata: Vec<String>,
    pub entity_id_hash: Bytes32Hex,
    pub previous_entity_hash: Bytes32Hex,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "origin")]
    pub publisher_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_address: Option<String>,
    /// Source ledger tag set by adapters on outbound notifications.
    ///
    /// Transport metadata only: never cached, never forwarded to the consumer,
    /// never re-sent to an adapter. `None` is simply absent on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl Event {
    pub fn global_id(&self) -> Result<GlobalId, EngineError> {
        extract_global_id(&self.data_location)
    }

    /// Drop the transport-only source tag. Idempotent.
    pub fn strip_network(&mut self) {
        self.network = None;
    }

    pub fn without_network(mut self) -> Self {
        self.strip_network();
        self
    }
}

/// Read the global id out of a `dataLocation` URL.
///
/// Pure and read-only: the URL is not rewritten, and the returned id is the
/// `hl` parameter value exactly as it appears (percent-decoded). An absent or
/// empty `hl`, or an unparseable URL, is [`EngineError::MissingGlobalId`].
pub fn extract_global_id(data_location: &str) -> Result<GlobalId, EngineError> {
    let url = Url::parse(data_location).map_err(|_| EngineError::MissingGlobalId)?;
    match url.query_pairs().find(|(key, _)| key == "hl") {
        Some((_, value)) if !value.is_empty() => Ok(GlobalId::from(value.into_owned())),
        _ => Err(EngineError::MissingGlobalId),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn hash(digit: char) -> Bytes32Hex {
        format!("0x{}", digit.to_string().repeat(64)).parse().unwrap()
    }

    fn sample_event() -> Event {
        Event {
            id: 7,
            timestamp: 1_700_000_000,
            event_type: "ProductAdded".into(),
            data_location: "https://example.com/events?hl=0xabc".into(),
            relevant_metadata: vec!["sbx".into()],
            entity_id_hash: hash('a'),
            previous_entity_hash: hash('b'),
            publisher_address: None,
            author_address: None,
            network: Some("hashnet".into()),
        }
    }

    #[test]
    fn global_id_is_the_hl_parameter() {
        assert_eq!(
            extract_global_id("https://example.com/ev?foo=1&hl=0xabc&bar=2").unwrap(),
            GlobalId::from("0xabc")
        );
    }

    #[test]
    fn missing_or_empty_hl_is_rejected() {
        assert!(matches!(
            extract_global_id("https://example.com/ev?foo=1"),
            Err(EngineError::MissingGlobalId)
        ));
        assert!(matches!(
            extract_global_id("https://example.com/ev?hl="),
            Err(EngineError::MissingGlobalId)
        ));
        assert!(matches!(
            extract_global_id("not a url"),
            Err(EngineError::MissingGlobalId)
        ));
    }

    #[test]
    fn strip_network_is_idempotent_and_never_serialized() {
        let mut event = sample_event();
        event.strip_network();
        assert_eq!(event.network, None);
        event.strip_network();
        assert_eq!(event.network, None);

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("network").is_none());
    }

    #[test]
    fn network_round_trips_from_adapter_payloads() {
        let event = sample_event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["network"], "hashnet");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn legacy_origin_key_maps_to_publisher_address() {
        let json = serde_json::json!({
            "eventType": "ProductAdded",
            "dataLocation": "https://example.com/ev?hl=0x1",
            "entityIdHash": format!("0x{}", "a".repeat(64)),
            "previousEntityHash": format!("0x{}", "b".repeat(64)),
            "origin": "0xdead",
        });
        let event: Event = serde_json::from_value(json).unwrap();
        assert_eq!(event.publisher_address.as_deref(), Some("0xdead"));
        assert_eq!(event.id, 0);
    }

    #[test]
    fn bytes32_hex_validates_and_normalizes() {
        let upper = format!("0x{}", "AB".repeat(32));
        let parsed: Bytes32Hex = upper.parse().unwrap();
        assert_eq!(parsed.as_str(), format!("0x{}", "ab".repeat(32)));

        assert!(format!("0x{}", "a".repeat(63)).parse::<Bytes32Hex>().is_err());
        assert!(format!("0x{}", "g".repeat(64)).parse::<Bytes32Hex>().is_err());
        assert!("a".repeat(66).parse::<Bytes32Hex>().is_err());
    }
}
