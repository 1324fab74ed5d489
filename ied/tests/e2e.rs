//! End-to-end flows over the real HTTP surface: a running engine, mock
//! adapters and a mock consumer, all on ephemeral local ports.

use std::{sync::Arc, time::Duration};

use ied::{
    api,
    cache::MemoryEventCache,
    testing::{fast_policy, ledger_event, publish_request, registry_of, MockAdapter, MockConsumer},
    BrokerContext, IedApiVersion, Options,
};
use ied_types::{
    ChainId, HealthResponse, PublishResponse, StatsResponse, Status, SubscribeResponse,
};
use ied_utils::test_utils::setup_test;
use pretty_assertions::assert_eq;
use surf_disco::Client;
use tide_disco::error::ServerError;
use tokio::time::sleep;
use url::Url;
use vbs::version::StaticVersionType;

struct Broker {
    client: Client<ServerError, IedApiVersion>,
    _task: tokio::task::JoinHandle<()>,
}

async fn start_broker(adapters: &[&MockAdapter], replication_delay_ms: u64) -> Broker {
    let port = portpicker::pick_unused_port().expect("no free ports");
    let mut opt = Options::default();
    opt.port = port;
    opt.replication_delay_ms = replication_delay_ms;
    opt.base_url = format!("http://localhost:{port}").parse().unwrap();

    let context = BrokerContext::init(
        &opt,
        Arc::new(MemoryEventCache::default()),
        registry_of(adapters, fast_policy()),
        false,
    )
    .await
    .unwrap();

    let task = tokio::spawn(async move {
        if let Err(err) = api::serve(port, context, IedApiVersion::instance()).await {
            tracing::error!("broker exited: {err}");
        }
    });

    let base: Url = format!("http://localhost:{port}").parse().unwrap();
    let client = Client::<ServerError, IedApiVersion>::new(base);
    for _ in 0..200 {
        if client.get::<StatsResponse>("status/stats").send().await.is_ok() {
            return Broker { client, _task: task };
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("broker did not come up");
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_event_reaches_every_adapter_and_the_cache() {
    setup_test();
    let hashnet = MockAdapter::spawn("hashnet", "1").await;
    let alastria = MockAdapter::spawn("alastria", "2").await;
    let broker = start_broker(&[&hashnet, &alastria], 0).await;

    let response: PublishResponse = broker
        .client
        .post("api/v1/publishEvent")
        .body_json(&publish_request("0xabc"))
        .unwrap()
        .send()
        .await
        .unwrap();

    assert_eq!(response.adapters.len(), 2);
    assert!(response.adapters.iter().all(|outcome| outcome.success));
    assert_eq!(hashnet.records.publishes().len(), 1);
    assert_eq!(alastria.records.publishes().len(), 1);

    let stats: StatsResponse = broker
        .client
        .get("status/stats")
        .send()
        .await
        .unwrap();
    assert_eq!(stats.cache.published[&ChainId::from("1")], 1);
    assert_eq!(stats.cache.published[&ChainId::from("2")], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_publications_are_rejected_with_400() {
    setup_test();
    let hashnet = MockAdapter::spawn("hashnet", "1").await;
    let broker = start_broker(&[&hashnet], 0).await;

    // Bad entityId: not 32 bytes of hex.
    let result: Result<PublishResponse, _> = broker
        .client
        .post("api/v1/publishEvent")
        .body_json(&serde_json::json!({
            "eventType": "ProductAdded",
            "dataLocation": "https://example.com/ev?hl=0x1",
            "entityId": "0x123",
            "previousEntityHash": format!("0x{}", "2".repeat(64)),
        }))
        .unwrap()
        .send()
        .await;
    assert!(result.is_err());
    assert!(hashnet.records.publishes().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_ledger_notification_is_replicated_to_the_other_ledger() {
    setup_test();
    let hashnet = MockAdapter::spawn("hashnet", "1").await;
    let alastria = MockAdapter::spawn("alastria", "2").await;
    let broker = start_broker(&[&hashnet, &alastria], 0).await;

    // The webhook acknowledges immediately; replication runs detached.
    let () = broker
        .client
        .post("internal/eventNotification/hashnet")
        .body_json(&ledger_event("0xccc", "ProductAdded", Some("hashnet")))
        .unwrap()
        .send()
        .await
        .unwrap();

    for _ in 0..200 {
        if alastria.records.publishes().len() == 1 {
            break;
        }
        sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(alastria.records.publishes().len(), 1);
    assert!(hashnet.records.publishes().is_empty());

    // The replicated body went out without the source tag.
    let replicated = &alastria.records.publishes()[0];
    assert_eq!(replicated.data_location, "https://example.com/ev?hl=0xccc");
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriptions_deliver_deduplicated_consumer_notifications() {
    setup_test();
    let hashnet = MockAdapter::spawn("hashnet", "1").await;
    let alastria = MockAdapter::spawn("alastria", "2").await;
    let consumer = MockConsumer::spawn().await;
    let broker = start_broker(&[&hashnet, &alastria], 0).await;

    let response: SubscribeResponse = broker
        .client
        .post("api/v1/subscribe")
        .body_json(&serde_json::json!({
            "eventTypes": ["ProductAdded"],
            "notificationEndpoint": consumer.callback_url().as_str(),
        }))
        .unwrap()
        .send()
        .await
        .unwrap();
    assert!(response.adapters.iter().all(|outcome| outcome.success));

    // One copy per source ledger lands on the webhook; only one may pass.
    for _ in 0..2 {
        let () = broker
            .client
            .post("internal/desmosNotification")
            .body_json(&ledger_event("0xbbb", "ProductAdded", Some("hashnet")))
            .unwrap()
            .send()
            .await
            .unwrap();
    }

    for _ in 0..200 {
        if !consumer.records.events().is_empty() {
            break;
        }
        sleep(Duration::from_millis(25)).await;
    }
    // Give a straggling duplicate dispatch time to (not) arrive.
    sleep(Duration::from_millis(200)).await;

    let delivered = consumer.records.events();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].get("network").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_the_engine_view_of_the_fleet() {
    setup_test();
    let hashnet = MockAdapter::spawn("hashnet", "1").await;
    let broker = start_broker(&[&hashnet], 0).await;

    let health: HealthResponse = broker
        .client
        .get("status/health")
        .send()
        .await
        .unwrap();
    assert_eq!(health.status, Status::Up);
    assert_eq!(health.redis, Status::Up);
    assert_eq!(health.adapters.len(), 1);

    // A dead fleet degrades the engine and the route starts failing.
    hashnet.records.set_healthy(false);
    let result: Result<HealthResponse, _> = broker
        .client
        .get("status/health")
        .send()
        .await;
    assert!(result.is_err());
}
