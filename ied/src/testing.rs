//! In-process mock adapters and consumer webhooks for engine tests.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use async_lock::RwLock;
use futures::FutureExt;
use ied_types::{
    AdapterSubscribeRequest, ChainId, Event, HealthAck, PublishAck, PublishRequest,
};
use parking_lot::Mutex;
use portpicker::pick_unused_port;
use tide_disco::{error::ServerError, Api, App, Error as _, StatusCode};
use tokio::{task::JoinHandle, time::sleep};
use url::Url;
use vbs::version::StaticVersionType;

use crate::{
    adapter::{AdapterDescriptor, AdapterRegistry, RetryPolicy},
    IedApiVersion,
};

const MOCK_ADAPTER_API: &str = r#"
[meta]
NAME = "mock_adapter"
DESCRIPTION = "In-process ledger adapter used by tests"
FORMAT_VERSION = "0.1.0"

[route.health]
PATH = ["health"]
DOC = "Adapter health probe."

[route.publish]
PATH = ["publish"]
METHOD = "POST"
DOC = "Accept a publication."

[route.subscribe]
PATH = ["subscribe"]
METHOD = "POST"
DOC = "Install a subscription."

[route.listsubscriptions]
PATH = ["subscribe"]
METHOD = "GET"
DOC = "List installed subscriptions."
"#;

const MOCK_CONSUMER_API: &str = r#"
[meta]
NAME = "mock_consumer"
DESCRIPTION = "In-process consumer webhook used by tests"
FORMAT_VERSION = "0.1.0"

[route.health]
PATH = ["health"]
DOC = "Consumer liveness probe."

[route.webhook]
PATH = ["webhook"]
METHOD = "POST"
DOC = "Receive one event delivery."
"#;

/// Recorded interactions and behavior switches of a [`MockAdapter`].
pub struct MockAdapterRecords {
    publishes: Mutex<Vec<PublishRequest>>,
    subscribes: Mutex<Vec<AdapterSubscribeRequest>>,
    publish_attempts: AtomicUsize,
    healthy: AtomicBool,
    publish_error: Mutex<Option<String>>,
    reject_publish: AtomicBool,
    reject_subscribe: AtomicBool,
    timestamp: AtomicU64,
}

impl Default for MockAdapterRecords {
    fn default() -> Self {
        Self {
            publishes: Mutex::new(Vec::new()),
            subscribes: Mutex::new(Vec::new()),
            publish_attempts: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            publish_error: Mutex::new(None),
            reject_publish: AtomicBool::new(false),
            reject_subscribe: AtomicBool::new(false),
            timestamp: AtomicU64::new(1_000),
        }
    }
}

impl MockAdapterRecords {
    pub fn publishes(&self) -> Vec<PublishRequest> {
        self.publishes.lock().clone()
    }

    pub fn subscribes(&self) -> Vec<AdapterSubscribeRequest> {
        self.subscribes.lock().clone()
    }

    /// Publish attempts seen, including failed and rejected ones.
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Respond to publishes with a 500 carrying this message.
    pub fn set_publish_error(&self, message: Option<String>) {
        *self.publish_error.lock() = message;
    }

    /// Respond to publishes with a 400.
    pub fn set_reject_publish(&self, reject: bool) {
        self.reject_publish.store(reject, Ordering::SeqCst);
    }

    pub fn set_reject_subscribe(&self, reject: bool) {
        self.reject_subscribe.store(reject, Ordering::SeqCst);
    }

    fn health(&self) -> HealthAck {
        if self.healthy.load(Ordering::SeqCst) {
            HealthAck::up()
        } else {
            HealthAck {
                status: "DOWN".into(),
            }
        }
    }

    fn record_publish(&self, body: PublishRequest) -> Result<PublishAck, ServerError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_publish.load(Ordering::SeqCst) {
            return Err(ServerError::catch_all(
                StatusCode::BAD_REQUEST,
                "publication rejected".into(),
            ));
        }
        if let Some(message) = self.publish_error.lock().clone() {
            return Err(ServerError::catch_all(
                StatusCode::INTERNAL_SERVER_ERROR,
                message,
            ));
        }
        self.publishes.lock().push(body);
        Ok(PublishAck {
            timestamp: self.timestamp.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn record_subscribe(&self, body: AdapterSubscribeRequest) -> Result<(), ServerError> {
        if self.reject_subscribe.load(Ordering::SeqCst) {
            return Err(ServerError::catch_all(
                StatusCode::BAD_REQUEST,
                "subscription rejected".into(),
            ));
        }
        self.subscribes.lock().push(body);
        Ok(())
    }
}

struct MockAdapterState {
    records: Arc<MockAdapterRecords>,
}

/// A ledger adapter running on an ephemeral local port.
pub struct MockAdapter {
    pub name: String,
    pub chain_id: ChainId,
    pub records: Arc<MockAdapterRecords>,
    url: Url,
    task: JoinHandle<()>,
}

impl Drop for MockAdapter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockAdapter {
    /// Start a mock adapter and wait until it is serving.
    pub async fn spawn(name: &str, chain_id: &str) -> Self {
        let port = pick_unused_port().expect("no free ports");
        let records = Arc::new(MockAdapterRecords::default());

        let state = RwLock::new(MockAdapterState {
            records: Arc::clone(&records),
        });
        let mut app = App::<_, ServerError>::with_state(state);
        let toml: toml::Value = toml::from_str(MOCK_ADAPTER_API).unwrap();
        let mut api =
            Api::<RwLock<MockAdapterState>, ServerError, IedApiVersion>::new(toml).unwrap();
        api.get("health", |_req, state| {
            async move { Ok(state.records.health()) }.boxed()
        })
        .unwrap()
        .post("publish", |req, state| {
            async move {
                let body = req
                    .body_auto::<PublishRequest, IedApiVersion>(IedApiVersion::instance())
                    .map_err(ServerError::from_request_error)?;
                state.records.record_publish(body)
            }
            .boxed()
        })
        .unwrap()
        .post("subscribe", |req, state| {
            async move {
                let body = req
                    .body_auto::<AdapterSubscribeRequest, IedApiVersion>(IedApiVersion::instance())
                    .map_err(ServerError::from_request_error)?;
                state.records.record_subscribe(body)
            }
            .boxed()
        })
        .unwrap()
        .get("listsubscriptions", |_req, state| {
            async move {
                Ok(state
                    .records
                    .subscribes()
                    .iter()
                    .map(|sub| serde_json::to_value(sub).unwrap())
                    .collect::<Vec<_>>())
            }
            .boxed()
        })
        .unwrap();
        app.register_module("adapter", api).unwrap();

        let task = tokio::spawn(async move {
            if let Err(err) = app
                .serve(format!("0.0.0.0:{port}"), IedApiVersion::instance())
                .await
            {
                tracing::error!("mock adapter exited: {err}");
            }
        });

        let url: Url = format!("http://localhost:{port}/adapter/").parse().unwrap();
        wait_until_serving(&url).await;

        Self {
            name: name.into(),
            chain_id: ChainId::from(chain_id),
            records,
            url,
            task,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor::new(self.name.clone(), self.url.clone(), Some(self.chain_id.clone()))
    }
}

/// Deliveries captured by a [`MockConsumer`].
#[derive(Default)]
pub struct MockConsumerRecords {
    events: Mutex<Vec<serde_json::Value>>,
}

impl MockConsumerRecords {
    /// Raw JSON bodies, so tests can assert on wire-level shape.
    pub fn events(&self) -> Vec<serde_json::Value> {
        self.events.lock().clone()
    }
}

struct MockConsumerState {
    records: Arc<MockConsumerRecords>,
}

/// A consumer webhook running on an ephemeral local port.
pub struct MockConsumer {
    pub records: Arc<MockConsumerRecords>,
    callback_url: Url,
    task: JoinHandle<()>,
}

impl Drop for MockConsumer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockConsumer {
    pub async fn spawn() -> Self {
        let port = pick_unused_port().expect("no free ports");
        let records = Arc::new(MockConsumerRecords::default());

        let state = RwLock::new(MockConsumerState {
            records: Arc::clone(&records),
        });
        let mut app = App::<_, ServerError>::with_state(state);
        let toml: toml::Value = toml::from_str(MOCK_CONSUMER_API).unwrap();
        let mut api =
            Api::<RwLock<MockConsumerState>, ServerError, IedApiVersion>::new(toml).unwrap();
        api.get("health", |_req, _state| async move { Ok(HealthAck::up()) }.boxed())
            .unwrap()
            .post("webhook", |req, state| {
                async move {
                    let body = req
                        .body_auto::<serde_json::Value, IedApiVersion>(IedApiVersion::instance())
                        .map_err(ServerError::from_request_error)?;
                    state.records.events.lock().push(body);
                    Ok(())
                }
                .boxed()
            })
            .unwrap();
        app.register_module("consumer", api).unwrap();

        let task = tokio::spawn(async move {
            if let Err(err) = app
                .serve(format!("0.0.0.0:{port}"), IedApiVersion::instance())
                .await
            {
                tracing::error!("mock consumer exited: {err}");
            }
        });

        let base: Url = format!("http://localhost:{port}/consumer/").parse().unwrap();
        wait_until_serving(&base).await;

        Self {
            records,
            callback_url: base.join("webhook").unwrap(),
            task,
        }
    }

    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }
}

async fn wait_until_serving(base: &Url) {
    let client = surf_disco::Client::<ServerError, IedApiVersion>::new(base.clone());
    for _ in 0..200 {
        if client.get::<HealthAck>("health").send().await.is_ok() {
            return;
        }
        sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("mock server at {base} did not come up");
}

/// A tight retry budget so failure-path tests stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        retry_delay: std::time::Duration::from_millis(10),
        request_timeout: std::time::Duration::from_millis(500),
    }
}

pub fn registry_of(adapters: &[&MockAdapter], policy: RetryPolicy) -> Arc<AdapterRegistry> {
    let descriptors = adapters.iter().map(|mock| mock.descriptor()).collect();
    Arc::new(AdapterRegistry::new(descriptors, policy).unwrap())
}

/// A well-formed consumer publication whose global id is `hl`.
pub fn publish_request(hl: &str) -> PublishRequest {
    serde_json::from_value(serde_json::json!({
        "eventType": "ProductAdded",
        "dataLocation": format!("https://example.com/ev?hl={hl}"),
        "relevantMetadata": ["sbx"],
        "entityId": format!("0x{}", "1".repeat(64)),
        "previousEntityHash": format!("0x{}", "2".repeat(64)),
    }))
    .unwrap()
}

/// An event as a ledger adapter would notify it, optionally tagged with its
/// source network.
pub fn ledger_event(hl: &str, event_type: &str, network: Option<&str>) -> Event {
    serde_json::from_value(serde_json::json!({
        "id": 1,
        "timestamp": 1_700_000_000,
        "eventType": event_type,
        "dataLocation": format!("https://example.com/ev?hl={hl}"),
        "relevantMetadata": ["sbx"],
        "entityIdHash": format!("0x{}", "1".repeat(64)),
        "previousEntityHash": format!("0x{}", "2".repeat(64)),
        "network": network,
    }))
    .unwrap()
}
