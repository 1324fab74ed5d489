//! Engine configuration, read from CLI flags or environment.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use ied_utils::logging;
use url::Url;

use crate::{
    adapter::{AdapterDescriptor, RetryPolicy},
    cache::RedisOptions,
};

/// Deployment mode. Production fails fast where development degrades.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, derive_more::Display)]
pub enum EnvKind {
    #[display("development")]
    Development,
    #[display("production")]
    Production,
    #[display("test")]
    Test,
}

impl EnvKind {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Clone, Debug, Parser)]
pub struct Options {
    /// Port the HTTP surface binds to.
    #[clap(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Public base URL of this engine, used to build the callback endpoints
    /// installed on adapters.
    #[clap(long, env = "IED_BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: Url,

    #[clap(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,

    #[clap(long, env = "REDIS_PORT", default_value = "6379")]
    pub redis_port: u16,

    #[clap(long, env = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[clap(long, env = "REDIS_DB", default_value = "0")]
    pub redis_db: i64,

    /// Per-attempt timeout of adapter calls.
    #[clap(long, env = "ADAPTER_TIMEOUT_MS", default_value = "5000")]
    pub adapter_timeout_ms: u64,

    /// Timeout of consumer webhook deliveries.
    #[clap(long, env = "NOTIFICATION_TIMEOUT_MS", default_value = "5000")]
    pub notification_timeout_ms: u64,

    #[clap(long, env = "MAX_RETRY_ATTEMPTS", default_value = "3")]
    pub max_retry_attempts: usize,

    /// Base retry delay; attempt `n` backs off `n` times this.
    #[clap(long, env = "RETRY_DELAY_MS", default_value = "1000")]
    pub retry_delay_ms: u64,

    /// Propagation window waited out before replication checks for missing
    /// chains. Deployment tunable; the default matches observed worst-case
    /// inter-ledger arrival spread.
    #[clap(long, env = "REPLICATION_DELAY_MS", default_value = "15000")]
    pub replication_delay_ms: u64,

    /// Event types of the wildcard subscriptions installed on adapters at
    /// startup.
    #[clap(
        long,
        env = "INTERNAL_SUBSCRIPTION_EVENT_TYPES",
        default_value = "*",
        value_delimiter = ','
    )]
    pub internal_subscription_event_types: Vec<String>,

    /// Metadata tags attached to subscriptions installed on adapters.
    #[clap(
        long,
        env = "INTERNAL_SUBSCRIPTION_METADATA",
        default_value = "sbx",
        value_delimiter = ','
    )]
    pub internal_subscription_metadata: Vec<String>,

    /// Adapter set; each entry selects a `<NAME>_ADAPTER_URL` /
    /// `<NAME>_ADAPTER_NAME` / `<NAME>_CHAIN_ID` block in the environment.
    #[clap(long, env = "ADAPTER_NAMES", value_delimiter = ',')]
    pub adapter_names: Vec<String>,

    #[clap(long, env = "IED_ENV", value_enum, default_value = "development")]
    pub env: EnvKind,

    #[clap(flatten)]
    pub logging: logging::Config,
}

impl Default for Options {
    fn default() -> Self {
        // Defaults plus whatever the environment overrides, same as the CLI.
        Self::parse_from(std::iter::empty::<String>())
    }
}

impl Options {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn replication_delay(&self) -> Duration {
        Duration::from_millis(self.replication_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            request_timeout: self.adapter_timeout(),
        }
    }

    pub fn redis(&self) -> RedisOptions {
        RedisOptions {
            host: self.redis_host.clone(),
            port: self.redis_port,
            password: self.redis_password.clone(),
            db: self.redis_db,
        }
    }

    /// Base URL with a trailing slash, so joining route paths keeps the full
    /// path.
    pub fn base_url(&self) -> Url {
        let mut url = self.base_url.clone();
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url
    }

    /// Resolve the configured adapter names against the environment.
    pub fn adapters(&self) -> anyhow::Result<Vec<AdapterDescriptor>> {
        self.adapter_names
            .iter()
            .map(|name| AdapterDescriptor::from_env(name))
            .collect()
    }
}
