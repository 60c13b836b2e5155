//! HTTP surface tests driven through the router in-process

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{get, post, router, send, test_config, API_KEY};

fn banking_agent() -> serde_json::Value {
    json!({
        "name": "Banking Agent",
        "type": "BANKING",
        "endpoint": "http://localhost:8001",
        "capabilities": ["CHECK_BALANCE"]
    })
}

#[tokio::test]
async fn test_probes_skip_authentication() {
    let app = router(test_config()).await;

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["store"], "disabled");
    assert_eq!(body["tasks_in_flight"], 0);
}

#[tokio::test]
async fn test_api_requires_key() {
    let app = router(test_config()).await;

    let (status, body) = send(&app, "GET", "/api/v1/agents", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["category"], "unauthorized");

    let (status, _) = send(&app, "GET", "/api/v1/agents", None, Some("  ")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = get(&app, "/api/v1/agents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"agents": [], "count": 0}));
}

#[tokio::test]
async fn test_configured_keys_are_enforced() {
    let mut config = test_config();
    config.security.api_keys = vec!["secret".to_string()];
    let app = router(config).await;

    let (status, _) = send(&app, "GET", "/api/v1/rules", None, Some(API_KEY)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/api/v1/rules", None, Some("secret")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_authentication_can_be_disabled() {
    let mut config = test_config();
    config.security.require_api_key = false;
    let app = router(config).await;

    let (status, _) = send(&app, "GET", "/api/v1/agents", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_and_fetch_agent() {
    let app = router(test_config()).await;

    let (status, registered) = post(&app, "/api/v1/register-agent", banking_agent()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registered["type"], "BANKING");
    assert_eq!(registered["status"], "HEALTHY");
    let agent_id = registered["agent_id"].as_str().unwrap();
    assert!(agent_id.starts_with("agent_"));
    assert!(registered["registered_at"].is_string());

    let (status, agent) = get(&app, &format!("/api/v1/agent/{agent_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agent["capabilities"], json!(["CHECK_BALANCE"]));

    let (_, listed) = get(&app, "/api/v1/agents").await;
    assert_eq!(listed["count"], 1);
}

#[tokio::test]
async fn test_invalid_registration_is_bad_request() {
    let app = router(test_config()).await;

    let (status, body) = post(
        &app,
        "/api/v1/register-agent",
        json!({"name": "A", "type": "BANKING", "endpoint": "http://a", "capabilities": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["category"], "validation");
    assert_eq!(body["code"], 400);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/register-agent",
        Some(json!("not an object")),
        Some(API_KEY),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let app = router(test_config()).await;

    for uri in [
        "/api/v1/agent/agent_missing",
        "/api/v1/get-result/task_missing",
        "/api/v1/get-session/sess_missing",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["category"], "not_found");
    }
}

#[tokio::test]
async fn test_status_update_endpoint() {
    let app = router(test_config()).await;
    let (_, registered) = post(&app, "/api/v1/register-agent", banking_agent()).await;
    let agent_id = registered["agent_id"].as_str().unwrap();
    let uri = format!("/api/v1/agent/{agent_id}/status");

    let (status, agent) = send(&app, "PUT", &uri, Some(json!({"status": "unhealthy"})), Some(API_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agent["status"], "UNHEALTHY");

    let (status, _) = send(&app, "PUT", &uri, Some(json!({"status": "ASLEEP"})), Some(API_KEY)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_endpoints() {
    let app = router(test_config()).await;

    let (status, session) = post(
        &app,
        "/api/v1/create-session",
        json!({"user_id": "U1", "channel": "MB", "context": {"language": "en"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = session["session_id"].as_str().unwrap();

    let (status, fetched) = get(&app, &format!("/api/v1/get-session/{session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["context"]["language"], "en");
    assert_eq!(fetched["task_history"], json!([]));

    let (status, _) = post(&app, "/api/v1/create-session", json!({"channel": "MB"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rule_upload_replaces_rule_set() {
    let app = router(test_config()).await;

    let (_, before) = get(&app, "/api/v1/rules").await;
    assert_eq!(before["version"], 1);
    assert_eq!(before["count"], 6);

    let (status, uploaded) = post(
        &app,
        "/api/v1/rules/upload",
        json!({"rules": [
            {"name": "loans", "condition": {"type": "intent", "equals": "APPLY_LOAN"}, "agent_type": "CLEARANCE"}
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uploaded["count"], 1);
    assert_eq!(uploaded["version"], 2);

    let (_, after) = get(&app, "/api/v1/rules").await;
    assert_eq!(after["count"], 1);
    assert_eq!(after["rules"][0]["name"], "loans");

    let (status, body) = post(&app, "/api/v1/rules/upload", json!({"rules": [{"condition": 5}]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["category"], "validation");

    // a rejected upload leaves the active set alone
    let (_, unchanged) = get(&app, "/api/v1/rules").await;
    assert_eq!(unchanged["version"], 2);
}

#[tokio::test]
async fn test_uploaded_rules_are_written_to_rules_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules").join("active.json");
    let mut config = test_config();
    config.rules.path = Some(path.display().to_string());
    let app = router(config).await;

    let (status, _) = post(
        &app,
        "/api/v1/rules/upload",
        json!([{"name": "all", "condition": {"type": "always"}, "agent_type": "BANKING"}]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["rules"][0]["name"], "all");
}

#[tokio::test]
async fn test_submit_validation_and_acceptance() {
    let app = router(test_config()).await;

    let (status, body) = post(
        &app,
        "/api/v1/submit-task",
        json!({"user_id": "U1", "channel": "MB"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["category"], "validation");

    let (status, accepted) = post(
        &app,
        "/api/v1/submit-task",
        json!({"user_id": "U1", "channel": "MB", "intent": "CHECK_BALANCE"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["status"], "PENDING");
    assert!(accepted["task_id"].as_str().unwrap().starts_with("task_"));
    assert!(accepted["session_id"].as_str().unwrap().starts_with("sess_"));
}
