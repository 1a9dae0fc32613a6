//! Integration tests for the operator API
//!
//! These tests verify that:
//! - Client, system and threshold endpoints drive the control surface
//! - Validation errors map to 4xx responses
//! - Authentication middleware functions properly

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use client_monitoring::{
    api::{ApiServerConfig, ApiState, spawn_api_server},
    config::parse_config,
    hub::MonitoringHub,
    notify::Notifiers,
    storage::MemoryStore,
};
use serde_json::{Value, json};

const TOKEN: &str = "test-token";

async fn spawn_test_api() -> (MonitoringHub, SocketAddr) {
    let config = parse_config(r#"{ "clients": [], "storage": { "backend": "none" } }"#).unwrap();
    let hub = MonitoringHub::start(&config, Arc::new(MemoryStore::new()), Notifiers::new())
        .await
        .unwrap();

    let state = ApiState::new(hub.control().clone(), hub.store().clone());
    let api_config = ApiServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: Some(TOKEN.to_string()),
        enable_cors: true,
    };
    let addr = spawn_api_server(api_config, state).await.unwrap();
    (hub, addr)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}/api/v1{path}")
}

#[tokio::test]
async fn test_health_is_public() {
    let (hub, addr) = spawn_test_api().await;

    let response = client().get(url(addr, "/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"]["healthy"], true);
    assert!(body["uptime_seconds"].as_i64().is_some());

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_auth_required_for_everything_else() {
    let (hub, addr) = spawn_test_api().await;

    let response = client().get(url(addr, "/clients")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client()
        .get(url(addr, "/clients"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client()
        .get(url(addr, "/clients"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_lifecycle() {
    let (hub, addr) = spawn_test_api().await;
    let http = client();

    let response = http
        .post(url(addr, "/clients"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "client_id": "acme",
            "name": "Acme Corp",
            "systems": [{ "name": "crm", "endpoint": "http://127.0.0.1:9", "interval": 3600 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = http
        .post(url(addr, "/clients/acme/systems"))
        .bearer_auth(TOKEN)
        .json(&json!({ "name": "erp", "endpoint": "http://127.0.0.1:9", "interval": 3600 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(hub.scheduler().pollers().await.unwrap().len(), 2);

    let overview: Value = http
        .get(url(addr, "/clients"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overview["summary"]["total_clients"], 1);
    assert_eq!(overview["clients"][0]["systems_count"], 2);

    let response = http
        .get(url(addr, "/clients/acme/snapshot?timeframe=7d"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot: Value = response.json().await.unwrap();
    assert_eq!(snapshot["status"], "unknown");

    let response = http
        .get(url(addr, "/clients/acme/reports/monthly"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["report_type"], "monthly");

    let response = http
        .delete(url(addr, "/clients/acme/systems/erp"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = http
        .delete(url(addr, "/clients/acme"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(hub.scheduler().pollers().await.unwrap().is_empty());

    let response = http
        .get(url(addr, "/clients/acme/snapshot"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_threshold_endpoints() {
    let (hub, addr) = spawn_test_api().await;
    let http = client();

    let response = http
        .post(url(addr, "/thresholds"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "client": "*",
            "metric": "uptime",
            "comparison": "less_than",
            "value": 95.0,
            "channel": "email"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let check: Value = response.json().await.unwrap();
    let id = check["threshold"]["id"].as_u64().unwrap();

    let response = http
        .put(url(addr, &format!("/thresholds/{id}")))
        .bearer_auth(TOKEN)
        .json(&json!({
            "client": "*",
            "metric": "uptime",
            "comparison": "less_than",
            "value": 99.0,
            "channel": "chat"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let check: Value = response.json().await.unwrap();
    assert_eq!(check["threshold"]["value"], 99.0);

    let response = http
        .post(url(addr, "/thresholds"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "client": "*",
            "metric": "cpu_temperature",
            "comparison": "greater_than",
            "value": 80.0,
            "channel": "email"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("cpu_temperature"));

    let response = http
        .delete(url(addr, &format!("/thresholds/{id}")))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let list: Value = http
        .get(url(addr, "/thresholds"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 1);
    assert_eq!(list["thresholds"][0]["active"], false);

    let response = http
        .delete(url(addr, "/thresholds/999"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    hub.shutdown().await.unwrap();
}
