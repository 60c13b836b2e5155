//! HTTP handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use banking_mcp_core::{
    AgentRegistration, AgentStatus, AgentType, SessionRequest, TaskRequest,
};

use crate::error::AppError;
use crate::server::AppState;

/// Projection returned from agent registration
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub agent_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: String,
}

/// GET /health - Liveness
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "banking-mcp",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /ready - Readiness, including durable store availability
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let loaded = state.registry.is_loaded();
    let store = match &state.gate {
        Some(gate) => json!(gate.status()),
        None => json!("disabled"),
    };
    let status = if loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if loaded { "ready" } else { "loading" },
            "store": store,
            "agents": state.registry.count().await,
            "dispatch_permits": state.orchestrator.available_permits(),
            "tasks_in_flight": state.orchestrator.tasks_in_flight(),
        })),
    )
}

/// POST /api/v1/submit-task - Accept a task for asynchronous processing
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let accepted = state.orchestrator.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/v1/get-result/:task_id
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.orchestrator.get_result(&task_id).await?;
    Ok((StatusCode::OK, Json(result)))
}

/// POST /api/v1/register-agent
pub async fn register_agent(
    State(state): State<AppState>,
    payload: Result<Json<AgentRegistration>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(registration) = payload?;
    let agent = state.registry.register(registration).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisteredAgent {
            agent_id: agent.agent_id,
            name: agent.name,
            agent_type: agent.agent_type,
            status: agent.status,
            registered_at: agent.registered_at,
        }),
    ))
}

/// GET /api/v1/agent/:agent_id
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let agent = state.registry.get(&agent_id).await?;
    Ok((StatusCode::OK, Json(agent)))
}

/// GET /api/v1/agents
pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.registry.list_all().await;
    Json(json!({
        "count": agents.len(),
        "agents": agents,
    }))
}

/// PUT /api/v1/agent/:agent_id/status
pub async fn update_agent_status(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(change) = payload?;
    let status: AgentStatus = change.status.parse()?;
    let agent = state.registry.update_status(&agent_id, status).await?;
    Ok((StatusCode::OK, Json(agent)))
}

/// POST /api/v1/create-session
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let session = state.sessions.create_session(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/v1/get-session/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions.get_session(&session_id).await?;
    Ok((StatusCode::OK, Json(session)))
}

/// POST /api/v1/rules/upload - Replace the whole rule set
pub async fn upload_rules(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(document) = payload?;
    let installed = state.rules.upload_document(document)?;

    if let Some(path) = state.rules_path.clone() {
        let rules = state.rules.clone();
        let saved = tokio::task::spawn_blocking(move || rules.save_to_file(&path)).await;
        match saved {
            Ok(Ok(())) => info!(version = installed.version, "Rule set written back to rules file"),
            Ok(Err(err)) => warn!(error = %err, "Failed to write rules file"),
            Err(err) => warn!(error = %err, "Rules file writer panicked"),
        }
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Rules uploaded successfully",
            "count": installed.len(),
            "version": installed.version,
        })),
    ))
}

/// GET /api/v1/rules
pub async fn get_rules(State(state): State<AppState>) -> impl IntoResponse {
    let rule_set = state.rules.rules();
    Json(json!({
        "count": rule_set.len(),
        "version": rule_set.version,
        "rules": rule_set.rules,
    }))
}

/// Reject requests without an acceptable API key
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = state.security.api_key_header.as_str();
    let key = request
        .headers()
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if key.is_empty() {
        return Err(AppError::Unauthorized("Missing API key".to_string()));
    }
    if !state.security.api_keys.is_empty() && !state.security.api_keys.iter().any(|k| k == key) {
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    }

    Ok(next.run(request).await)
}
