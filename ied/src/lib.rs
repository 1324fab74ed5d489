//! Interchain event distributor.
//!
//! A middleware broker that keeps one logical event stream consistent across
//! independently operated distributed-ledger backends ("adapters") while
//! exposing a single publish/subscribe surface to its consumer. Events
//! published to any ledger are replicated onto every other configured ledger,
//! and the consumer sees each logical event at most once no matter how many
//! ledgers carry it.
//!
//! The set-backed [`cache`] anchors everything: `publishedEvents:<chainId>`
//! membership terminates the cyclic publish → notify → replicate flow, and
//! the `notifiedEvents` set gates consumer delivery.

pub mod adapter;
pub mod api;
pub mod cache;
pub mod context;
pub mod options;
pub mod publisher;
pub mod replication;
pub mod subscriptions;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use vbs::version::StaticVersion;

pub use context::{init_broker, BrokerContext};
pub use ied_types::EngineError;
pub use options::{EnvKind, Options};

/// API version bound to every tide-disco module and surf-disco client.
pub type IedApiVersion = StaticVersion<0, 1>;
