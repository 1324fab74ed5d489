//! Shared types for the interchain event distributor: the event data model,
//! the request/response envelopes of the consumer and adapter interfaces, and
//! the engine error taxonomy.

pub mod error;
pub mod event;
pub mod request;
pub mod response;

pub use error::EngineError;
pub use event::{extract_global_id, Bytes32Hex, ChainId, Event, GlobalId};
pub use request::{
    AdapterSubscribeRequest, HealthAck, PublishAck, PublishRequest, SubscribeRequest,
};
pub use response::{
    AdapterHealth, AdapterIdentity, AdapterOutcome, CacheStats, HealthResponse, PublishResponse,
    StatsResponse, Status, SubscribeResponse,
};
