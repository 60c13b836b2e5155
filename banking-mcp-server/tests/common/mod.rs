//! Common test utilities for the server test suites
//!
//! Builds a memory-only server with no background jobs and drives its
//! router in-process.

#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use banking_mcp_server::config::Config;
use banking_mcp_server::server::Server;

pub const API_KEY: &str = "test-api-key";

/// Memory-only configuration without seeding or health probing
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.enabled = false;
    config.agents.seed_defaults = false;
    config.agents.health_check_interval_secs = 0;
    config.agents.dispatch_timeout_secs = 1;
    config
}

pub async fn router(config: Config) -> Router {
    Server::new(config)
        .await
        .expect("Failed to build server")
        .router()
}

/// Send a request and decode the JSON reply (`Value::Null` for an empty body)
pub async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    api_key: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = router.clone().oneshot(request).await.expect("Request failed");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, "GET", uri, None, Some(API_KEY)).await
}

pub async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(router, "POST", uri, Some(body), Some(API_KEY)).await
}

/// Poll the result endpoint until the task is terminal
pub async fn wait_for_terminal(router: &Router, task_id: &str) -> Value {
    for _ in 0..300 {
        let (status, result) = get(router, &format!("/api/v1/get-result/{task_id}")).await;
        assert_eq!(status, StatusCode::OK);
        let state = result["status"].as_str().unwrap_or_default();
        if matches!(state, "COMPLETED" | "FAILED" | "REJECTED") {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached a terminal status");
}
