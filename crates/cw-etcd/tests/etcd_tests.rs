//! Keys producer and watch consumer tests against a mocked store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cw_common::{Exchange, Processor, Producer};
use cw_etcd::{headers, EtcdClient, EtcdConfig, KeysProducer, StatsProducer, WatchConsumer};
use serde_json::json;
use tokio::time::sleep;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct CollectingProcessor {
    exchanges: Mutex<Vec<Exchange>>,
}

impl CollectingProcessor {
    fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.lock().unwrap().clone()
    }
}

#[async_trait]
impl Processor for CollectingProcessor {
    async fn process(&self, exchange: Exchange) -> anyhow::Result<()> {
        self.exchanges.lock().unwrap().push(exchange);
        Ok(())
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn producer_for(server: &MockServer, config: EtcdConfig) -> KeysProducer {
    let config = EtcdConfig {
        url: server.uri(),
        ..config
    };
    let client = Arc::new(EtcdClient::new(&config).unwrap());
    KeysProducer::new(client, config)
}

#[tokio::test]
async fn set_writes_the_body_with_ttl() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v2/keys/feature/flags/beta"))
        .and(body_string_contains("value=on"))
        .and(body_string_contains("ttl=30"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "action": "set",
            "node": { "key": "/feature/flags/beta", "value": "on", "modifiedIndex": 8, "createdIndex": 8 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, EtcdConfig::default());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "set")
        .with_header(headers::PATH, "/feature/flags/beta")
        .with_header(headers::TTL, 30u64)
        .with_body("on");

    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.header_u64(headers::INDEX), Some(8));
    assert_eq!(
        exchange.body().unwrap()["value"],
        json!("on")
    );
}

#[tokio::test]
async fn get_maps_the_node_onto_the_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/keys/feature/flags/beta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": "get",
            "node": { "key": "/feature/flags/beta", "value": "on", "modifiedIndex": 8, "createdIndex": 8 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = EtcdConfig::default().with_path("/feature/flags/beta");
    let producer = producer_for(&server, config);
    let mut exchange = Exchange::new().with_header(headers::ACTION, "get");

    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.header_str(headers::PATH), Some("/feature/flags/beta"));
    assert_eq!(exchange.body().unwrap()["value"], json!("on"));
}

#[tokio::test]
async fn get_missing_key_is_a_typed_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/keys/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errorCode": 100,
            "message": "Key not found",
            "cause": "/missing",
            "index": 11
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, EtcdConfig::default());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "get")
        .with_header(headers::PATH, "/missing");

    let error = producer.process(&mut exchange).await.unwrap_err();
    assert!(error.to_string().contains("key not found"));
}

#[tokio::test]
async fn stats_retrieves_the_leader_document() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/stats/leader"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "leader": "node-1",
            "followers": { "node-2": { "counts": { "success": 100, "fail": 0 } } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = EtcdConfig::new(server.uri());
    let client = Arc::new(EtcdClient::new(&config).unwrap());
    let producer = StatsProducer::new(client, config);

    let mut exchange = Exchange::new().with_header(headers::ACTION, "leader");
    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.body().unwrap()["leader"], json!("node-1"));
}

#[tokio::test]
async fn watch_resumes_past_the_delivered_index() {
    let server = MockServer::start().await;

    // The first wait (no waitIndex yet) reports a change at index 7.
    Mock::given(method("GET"))
        .and(path("/v2/keys/feature/flags"))
        .and(query_param("wait", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": "set",
            "node": { "key": "/feature/flags", "value": "v2", "modifiedIndex": 7, "createdIndex": 3 }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Subsequent waits resume from index 8 and hang past the client bound.
    Mock::given(method("GET"))
        .and(path("/v2/keys/feature/flags"))
        .and(query_param("wait", "true"))
        .and(query_param("waitIndex", "8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(60))
                .set_body_json(json!({
                    "action": "set",
                    "node": { "key": "/feature/flags", "value": "v3", "modifiedIndex": 9 }
                })),
        )
        .mount(&server)
        .await;

    let config = EtcdConfig::new(server.uri())
        .with_path("/feature/flags")
        .with_timeout_ms(60_000);
    let client = Arc::new(EtcdClient::new(&config).unwrap());
    let processor = Arc::new(CollectingProcessor::default());
    let consumer = WatchConsumer::new(client, config, processor.clone()).unwrap();

    consumer.start().unwrap();
    eventually("change delivered", || processor.exchanges().len() == 1).await;

    let exchanges = processor.exchanges();
    assert_eq!(exchanges[0].header_str(headers::PATH), Some("/feature/flags"));
    assert_eq!(exchanges[0].header_u64(headers::INDEX), Some(7));
    assert_eq!(exchanges[0].body().unwrap()["value"], json!("v2"));
    assert_eq!(consumer.index(), 8);

    consumer.stop();
}

#[tokio::test]
async fn timed_out_wait_synthesizes_an_empty_exchange_when_configured() {
    let server = MockServer::start().await;

    // Always slower than the client-side bound.
    Mock::given(method("GET"))
        .and(path("/v2/keys/feature/flags"))
        .and(query_param("wait", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(60))
                .set_body_json(json!({
                    "action": "set",
                    "node": { "key": "/feature/flags", "value": "v2", "modifiedIndex": 7 }
                })),
        )
        .mount(&server)
        .await;

    let config = EtcdConfig::new(server.uri())
        .with_path("/feature/flags")
        .with_timeout_ms(50)
        .with_send_empty_exchange_on_timeout(true);
    let client = Arc::new(EtcdClient::new(&config).unwrap());
    let processor = Arc::new(CollectingProcessor::default());
    let consumer = WatchConsumer::new(client, config, processor.clone()).unwrap();

    consumer.start().unwrap();
    eventually("timeout exchange delivered", || {
        !processor.exchanges().is_empty()
    })
    .await;

    let exchanges = processor.exchanges();
    assert_eq!(exchanges[0].header_bool(headers::TIMEOUT), Some(true));
    assert_eq!(exchanges[0].header_str(headers::PATH), Some("/feature/flags"));
    assert!(exchanges[0].body().is_none());
    assert_eq!(consumer.index(), 0);

    consumer.stop();
}
