//! Producer tests against a mocked instance.

use std::sync::Arc;

use cw_common::{Exchange, Producer};
use cw_servicenow::{headers, ServiceNowClient, ServiceNowConfig, ServiceNowProducer};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn producer_for(server: &MockServer, config: ServiceNowConfig) -> ServiceNowProducer {
    let config = ServiceNowConfig {
        instance_url: server.uri(),
        ..config
    };
    let client = Arc::new(ServiceNowClient::new(&config).unwrap());
    ServiceNowProducer::new(client, config)
}

fn basic_config() -> ServiceNowConfig {
    ServiceNowConfig::new("http://placeholder", "admin", "secret")
}

#[tokio::test]
async fn retrieve_lists_records_with_query_params() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/incident"))
        .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
        .and(query_param("sysparm_query", "active=true"))
        .and(query_param("sysparm_limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                { "sys_id": "a1", "short_description": "Disk is full" },
                { "sys_id": "b2", "short_description": "VPN down" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, basic_config());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "retrieve")
        .with_header(headers::TABLE, "incident")
        .with_header(headers::QUERY, "active=true")
        .with_header(headers::LIMIT, 10u64);

    producer.process(&mut exchange).await.unwrap();
    let body = exchange.body().unwrap();
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["sys_id"], json!("a1"));
}

#[tokio::test]
async fn retrieve_by_sys_id_targets_the_record() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/incident/a1"))
        .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "sys_id": "a1", "short_description": "Disk is full" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, basic_config());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "retrieve")
        .with_header(headers::TABLE, "incident")
        .with_header(headers::SYS_ID, "a1");

    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.body().unwrap()["sys_id"], json!("a1"));
}

#[tokio::test]
async fn create_posts_the_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/table/incident"))
        .and(header("Authorization", "Basic YWRtaW46c2VjcmV0"))
        .and(body_json(json!({"short_description": "Printer on fire"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": { "sys_id": "c3", "short_description": "Printer on fire" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, basic_config());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "create")
        .with_header(headers::TABLE, "incident")
        .with_body(json!({"short_description": "Printer on fire"}));

    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.body().unwrap()["sys_id"], json!("c3"));
}

#[tokio::test]
async fn update_patches_the_record() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/now/table/incident/a1"))
        .and(body_json(json!({"state": "2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "sys_id": "a1", "state": "2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, basic_config());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "update")
        .with_header(headers::TABLE, "incident")
        .with_header(headers::SYS_ID, "a1")
        .with_body(json!({"state": "2"}));

    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.body().unwrap()["state"], json!("2"));
}

#[tokio::test]
async fn delete_clears_the_body_on_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/now/table/incident/a1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, basic_config());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "delete")
        .with_header(headers::TABLE, "incident")
        .with_header(headers::SYS_ID, "a1")
        .with_body(json!({"leftover": true}));

    producer.process(&mut exchange).await.unwrap();
    assert!(exchange.body().is_none());
}

#[tokio::test]
async fn api_error_envelope_becomes_a_typed_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/incident/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "No Record found", "detail": "Record doesn't exist" },
            "status": "failure"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, basic_config());
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "retrieve")
        .with_header(headers::TABLE, "incident")
        .with_header(headers::SYS_ID, "missing");

    let error = producer.process(&mut exchange).await.unwrap_err();
    assert!(error.to_string().contains("No Record found"));
}

#[tokio::test]
async fn aggregate_retrieves_stats() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/now/stats/incident"))
        .and(query_param("sysparm_count", "true"))
        .and(query_param("sysparm_group_by", "priority"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [ { "stats": { "count": "42" }, "groupby_fields": [] } ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = basic_config().with_resource("aggregate");
    let producer = producer_for(&server, config);
    let mut exchange = Exchange::new()
        .with_header(headers::ACTION, "retrieve")
        .with_header(headers::TABLE, "incident")
        .with_header(headers::COUNT, true)
        .with_header(headers::GROUP_BY, "priority");

    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.body().unwrap()[0]["stats"]["count"], json!("42"));
}

#[tokio::test]
async fn oauth_token_is_fetched_once_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth_token.do"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-123",
            "token_type": "Bearer",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/now/table/incident"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] })))
        .expect(2)
        .mount(&server)
        .await;

    let config = basic_config().with_oauth("client", "client-secret");
    let producer = producer_for(&server, config);

    for _ in 0..2 {
        let mut exchange = Exchange::new()
            .with_header(headers::ACTION, "retrieve")
            .with_header(headers::TABLE, "incident");
        producer.process(&mut exchange).await.unwrap();
    }
}

#[tokio::test]
async fn import_set_create_stages_the_record() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/now/import/u_incident_import"))
        .and(body_json(json!({"u_short_description": "Disk is full"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "result": [
                { "transform_map": "incident import", "status": "inserted", "sys_id": "i1" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let producer = producer_for(&server, basic_config());
    let mut exchange = Exchange::new()
        .with_header(headers::RESOURCE, "import")
        .with_header(headers::ACTION, "create")
        .with_header(headers::TABLE, "u_incident_import")
        .with_body(json!({"u_short_description": "Disk is full"}));

    producer.process(&mut exchange).await.unwrap();
    assert_eq!(exchange.body().unwrap()[0]["status"], json!("inserted"));
}

#[tokio::test]
async fn import_set_rejects_table_only_actions() {
    let server = MockServer::start().await;
    let producer = producer_for(&server, basic_config());

    let mut exchange = Exchange::new()
        .with_header(headers::RESOURCE, "import")
        .with_header(headers::ACTION, "delete")
        .with_header(headers::TABLE, "u_incident_import")
        .with_header(headers::SYS_ID, "i1");

    let error = producer.process(&mut exchange).await.unwrap_err();
    assert!(error.to_string().contains("unknown action"));
}

#[tokio::test]
async fn unknown_resource_fails_the_request() {
    let server = MockServer::start().await;
    let producer = producer_for(&server, basic_config());

    let mut exchange = Exchange::new()
        .with_header(headers::RESOURCE, "attachment")
        .with_header(headers::ACTION, "retrieve")
        .with_header(headers::TABLE, "incident");

    let error = producer.process(&mut exchange).await.unwrap_err();
    assert!(error.to_string().contains("unknown resource"));
}
