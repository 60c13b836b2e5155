//! Outbound calls to executor agents

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use banking_mcp_core::{Agent, RoutingDecision, Task, ValueMap};

/// Longest response body kept in a `Status` error
const MAX_ERROR_BODY: usize = 512;

/// Agent response statuses that count as an explicit rejection
const REJECTION_STATUSES: [&str; 3] = ["REJECTED", "FAILED", "ERROR"];

/// Failure of one outbound agent call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Agent call timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("Agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode agent response: {0}")]
    Decode(String),

    #[error("Agent rejected the task with status {status}")]
    Rejected {
        status: String,
        explanation: Option<String>,
        result: Option<Value>,
        risk_score: Option<f64>,
    },
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. })
    }
}

/// Task description handed to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRequest {
    /// The task intent
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub input_context: InputContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub channel: String,
    pub intent: String,
    pub data: ValueMap,
    pub context: ValueMap,
}

impl AgentRequest {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task: task.intent.clone(),
            session_id: task.session_id.clone(),
            input_context: InputContext {
                user_id: task.user_id.clone(),
                session_id: task.session_id.clone(),
                channel: task.channel.clone(),
                intent: task.intent.clone(),
                data: task.data.clone(),
                context: task.context.clone(),
            },
            routing: task.routing.clone(),
        }
    }
}

/// Body actually sent: the request addressed to one agent
#[derive(Serialize)]
struct Envelope<'a> {
    agent_id: &'a str,
    request_id: String,
    #[serde(flatten)]
    request: &'a AgentRequest,
}

/// Agent reply to a processed task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl AgentResponse {
    pub fn is_rejection(&self) -> bool {
        self.status.as_deref().is_some_and(|status| {
            REJECTION_STATUSES
                .iter()
                .any(|r| r.eq_ignore_ascii_case(status.trim()))
        })
    }

    /// Whether the result approves the request, either through
    /// `result.status == "APPROVED"` or `result.all_passed == true`
    pub fn approves(&self) -> bool {
        let Some(result) = self.result.as_ref() else {
            return false;
        };
        let approved = result.get("status").and_then(Value::as_str) == Some("APPROVED");
        let all_passed = result.get("all_passed").and_then(Value::as_bool) == Some(true);
        approved || all_passed
    }

    fn into_outcome(self) -> Result<AgentResponse, DispatchError> {
        if !self.is_rejection() {
            return Ok(self);
        }
        Err(DispatchError::Rejected {
            status: self.status.unwrap_or_default(),
            explanation: self.explanation,
            result: self.result,
            risk_score: self.risk_score,
        })
    }
}

/// Transport to executor agents
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Send `request` to `agent` and classify the reply
    async fn dispatch(
        &self,
        agent: &Agent,
        request: &AgentRequest,
    ) -> Result<AgentResponse, DispatchError>;

    /// Probe the agent's health endpoint
    async fn probe(&self, agent: &Agent) -> Result<(), DispatchError>;
}

/// HTTP/JSON agent client
pub struct HttpAgentClient {
    client: reqwest::Client,
    process_path: String,
    api_key: Option<String>,
    timeout: Duration,
    probe_timeout: Duration,
}

impl HttpAgentClient {
    pub fn new(
        process_path: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("banking-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            process_path: process_path.into(),
            api_key,
            timeout,
            probe_timeout,
        })
    }

    async fn post(&self, url: &str, body: &Envelope<'_>) -> Result<AgentResponse, DispatchError> {
        let mut builder = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }

        let response = builder.send().await.map_err(|e| transport(url, e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| transport(url, e))?;

        if !status.is_success() {
            let mut body = String::from_utf8_lossy(&bytes).into_owned();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| DispatchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn dispatch(
        &self,
        agent: &Agent,
        request: &AgentRequest,
    ) -> Result<AgentResponse, DispatchError> {
        let url = agent.process_url(&self.process_path);
        let envelope = Envelope {
            agent_id: &agent.agent_id,
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            request,
        };

        info!(
            agent_id = %agent.agent_id,
            agent_type = %agent.agent_type,
            request_id = %envelope.request_id,
            endpoint = %url,
            "Calling agent endpoint"
        );

        let response = tokio::time::timeout(self.timeout, self.post(&url, &envelope))
            .await
            .map_err(|_| DispatchError::Timeout { after: self.timeout })??;

        debug!(
            agent_id = %agent.agent_id,
            status = response.status.as_deref().unwrap_or(""),
            risk_score = response.risk_score,
            "Agent responded"
        );
        response.into_outcome()
    }

    async fn probe(&self, agent: &Agent) -> Result<(), DispatchError> {
        let url = agent.health_url();
        let request = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| transport(&url, e))?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(DispatchError::Status {
                    status: status.as_u16(),
                    body: String::new(),
                })
            }
        };

        tokio::time::timeout(self.probe_timeout, request)
            .await
            .map_err(|_| DispatchError::Timeout {
                after: self.probe_timeout,
            })?
    }
}

fn transport(url: &str, error: reqwest::Error) -> DispatchError {
    warn!(endpoint = %url, error = %error, "Agent transport error");
    DispatchError::Transport {
        url: url.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use banking_mcp_core::{AgentRegistration, TaskRequest};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn agent(endpoint: &str) -> Agent {
        Agent::from_registration(
            AgentRegistration::new("Banking Agent", "BANKING", endpoint).capability("TRANSFER_NEFT"),
        )
        .unwrap()
    }

    fn request() -> AgentRequest {
        let task = Task::new(
            TaskRequest::new("U1", "MB", "TRANSFER_NEFT")
                .data("amount", json!(100))
                .session("sess_1"),
        )
        .unwrap();
        AgentRequest::for_task(&task)
    }

    fn client(timeout: Duration) -> HttpAgentClient {
        HttpAgentClient::new("/process", Some("test-api-key".into()), timeout, timeout).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_sends_envelope_and_decodes_reply() {
        let server = MockServer::start().await;
        let target = agent(&server.uri());

        Mock::given(method("POST"))
            .and(path("/process"))
            .and(header("X-API-Key", "test-api-key"))
            .and(body_partial_json(json!({
                "agent_id": target.agent_id,
                "task": "TRANSFER_NEFT",
                "session_id": "sess_1",
                "input_context": {"user_id": "U1", "channel": "MB", "data": {"amount": 100}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "result": {"status": "APPROVED"},
                "risk_score": 0.1,
                "explanation": "within limits",
                "confidence": 0.9
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(Duration::from_secs(5))
            .dispatch(&target, &request())
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!({"status": "APPROVED"})));
        assert_eq!(response.risk_score, Some(0.1));
        assert!(response.approves());
    }

    #[tokio::test]
    async fn test_explicit_rejection_keeps_details() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "rejected",
                "result": {"reason": "limit exceeded"},
                "risk_score": 0.8,
                "explanation": "daily limit exceeded"
            })))
            .mount(&server)
            .await;

        let err = client(Duration::from_secs(5))
            .dispatch(&agent(&server.uri()), &request())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            DispatchError::Rejected { ref status, risk_score: Some(score), explanation: Some(_), result: Some(_) }
                if status == "rejected" && score == 0.8
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_dispatch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client(Duration::from_secs(5))
            .dispatch(&agent(&server.uri()), &request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Status {
                status: 503,
                body: "overloaded".into()
            }
        );
    }

    #[tokio::test]
    async fn test_slow_agent_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "SUCCESS"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = client(Duration::from_millis(200))
            .dispatch(&agent(&server.uri()), &request())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Agent call timed out after 200ms");
    }

    #[tokio::test]
    async fn test_malformed_reply_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(Duration::from_secs(5))
            .dispatch(&agent(&server.uri()), &request())
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Decode(_));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_transport_error() {
        // nothing listens on port 9 of localhost
        let err = client(Duration::from_secs(5))
            .dispatch(&agent("http://127.0.0.1:9"), &request())
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Transport { .. });
    }

    #[tokio::test]
    async fn test_probe_uses_health_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = client(Duration::from_secs(5));

        assert!(client.probe(&agent(&server.uri())).await.is_ok());

        let mut custom = agent(&server.uri());
        custom.health_check = Some("/status".into());
        assert_matches!(
            client.probe(&custom).await,
            Err(DispatchError::Status { status: 404, .. })
        );
    }

    #[test]
    fn test_approval_and_rejection_classification() {
        let approved = AgentResponse {
            result: Some(json!({"all_passed": true})),
            ..Default::default()
        };
        assert!(approved.approves());
        assert!(!approved.is_rejection());

        let pending = AgentResponse {
            status: Some("SUCCESS".into()),
            result: Some(json!({"status": "PENDING_REVIEW", "all_passed": false})),
            ..Default::default()
        };
        assert!(!pending.approves());

        let failed = AgentResponse {
            status: Some(" Error ".into()),
            ..Default::default()
        };
        assert!(failed.is_rejection());
    }
}
