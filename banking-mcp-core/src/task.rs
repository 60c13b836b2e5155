//! Task domain model and lifecycle state machine
//!
//! A task moves `PENDING -> PROCESSING -> {COMPLETED | FAILED | REJECTED}`.
//! A pending task may also be rejected directly when no agent can take it.
//! Terminal states are final: once reached, the record accepts no further
//! updates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ids, routing::RoutingDecision, value::ValueMap, Error, Result};

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Rejected
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Rejected)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Rejected)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "REJECTED" => Ok(TaskStatus::Rejected),
            other => Err(Error::validation(format!("Unknown task status: {other}"))),
        }
    }
}

/// Inbound task submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub data: ValueMap,
    #[serde(default)]
    pub context: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TaskRequest {
    pub fn new<S1, S2, S3>(user_id: S1, channel: S2, intent: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            channel: channel.into(),
            intent: intent.into(),
            ..Default::default()
        }
    }

    pub fn data<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn context<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn session<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::validation("user_id is required"));
        }
        if self.channel.trim().is_empty() {
            return Err(Error::validation("channel is required"));
        }
        if self.intent.trim().is_empty() {
            return Err(Error::validation("intent is required"));
        }
        Ok(())
    }
}

/// The unit of routed work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub user_id: String,
    pub channel: String,
    pub intent: String,
    #[serde(default)]
    pub data: ValueMap,
    #[serde(default)]
    pub context: ValueMap,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: u64,
}

impl Task {
    /// Create a PENDING task from a validated request
    pub fn new(request: TaskRequest) -> Result<Self> {
        request.validate()?;

        let now = Utc::now();
        Ok(Self {
            task_id: ids::new_task_id(),
            session_id: request.session_id,
            user_id: request.user_id,
            channel: request.channel,
            intent: request.intent,
            data: request.data,
            context: request.context,
            status: TaskStatus::Pending,
            agent_id: None,
            result: None,
            risk_score: None,
            explanation: None,
            error: None,
            routing: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: None,
            revision: 0,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Apply a partial update.
    ///
    /// The transition is checked before any field is touched, so a rejected
    /// update leaves the record unchanged.
    pub fn apply(&mut self, update: TaskUpdate) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::state_transition(format!(
                "Task {} is already {}",
                self.task_id, self.status
            )));
        }

        if let Some(next) = update.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(Error::state_transition(format!(
                    "Cannot move task {} from {} to {}",
                    self.task_id, self.status, next
                )));
            }
        }

        let now = Utc::now();
        if let Some(next) = update.status {
            self.status = next;
            if next.is_terminal() {
                self.completed_at = Some(update.completed_at.unwrap_or(now));
            }
        }
        if let Some(agent_id) = update.agent_id {
            self.agent_id = Some(agent_id);
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(risk_score) = update.risk_score {
            self.risk_score = Some(risk_score);
        }
        if let Some(explanation) = update.explanation {
            self.explanation = Some(explanation);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(routing) = update.routing {
            self.routing = Some(*routing);
        }

        self.updated_at = now;
        self.revision += 1;
        Ok(())
    }

    /// Time between creation and completion in milliseconds
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| done.signed_duration_since(self.created_at).num_milliseconds())
    }
}

/// Partial task mutation, applied atomically by the task manager
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub agent_id: Option<String>,
    pub result: Option<Value>,
    pub risk_score: Option<f64>,
    pub explanation: Option<String>,
    pub error: Option<String>,
    pub routing: Option<Box<RoutingDecision>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// PROCESSING with the chosen agent and the decision that picked it
    pub fn processing(decision: RoutingDecision) -> Self {
        Self {
            status: Some(TaskStatus::Processing),
            agent_id: Some(decision.agent_id.clone()),
            routing: Some(Box::new(decision)),
            ..Default::default()
        }
    }

    /// REJECTED with the routing failure recorded as error and explanation
    pub fn rejected<S: Into<String>>(reason: S) -> Self {
        let reason = reason.into();
        Self {
            status: Some(TaskStatus::Rejected),
            explanation: Some(reason.clone()),
            error: Some(reason),
            ..Default::default()
        }
    }

    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_risk_score(mut self, risk_score: Option<f64>) -> Self {
        self.risk_score = risk_score;
        self
    }

    pub fn with_explanation(mut self, explanation: Option<String>) -> Self {
        self.explanation = explanation;
        self
    }

    pub fn with_error<S: Into<String>>(mut self, error: S) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Submit acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAccepted {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
}

/// Poll response projected from a task record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub risk_score: Option<f64>,
    pub explanation: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResultResponse {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            status: task.status,
            result: task.result.clone(),
            risk_score: task.risk_score,
            explanation: task.explanation.clone(),
            error: task.error.clone(),
            completed_at: task.completed_at,
        }
    }
}

impl From<Task> for TaskResultResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_id,
            status: task.status,
            result: task.result,
            risk_score: task.risk_score,
            explanation: task.explanation,
            error: task.error,
            completed_at: task.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn transfer_task() -> Task {
        Task::new(
            TaskRequest::new("U1", "MB", "TRANSFER_NEFT").data("amount", json!(100)),
        )
        .unwrap()
    }

    #[test]
    fn test_task_creation() {
        let task = transfer_task();

        assert!(task.task_id.starts_with("task_"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.data["amount"], json!(100));
        assert!(task.agent_id.is_none());
        assert!(task.completed_at.is_none());
        assert_eq!(task.revision, 0);
    }

    #[test]
    fn test_request_validation() {
        for request in [
            TaskRequest::new("", "MB", "TRANSFER_NEFT"),
            TaskRequest::new("U1", " ", "TRANSFER_NEFT"),
            TaskRequest::new("U1", "MB", ""),
        ] {
            assert_matches!(Task::new(request), Err(Error::Validation { .. }));
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Rejected));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        for terminal in [Completed, Failed, Rejected] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Completed, Failed, Rejected] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_apply_completes_task() {
        let mut task = transfer_task();
        task.apply(TaskUpdate::status(TaskStatus::Processing)).unwrap();
        assert_eq!(task.revision, 1);

        task.apply(
            TaskUpdate::status(TaskStatus::Completed)
                .with_result(json!({"status": "APPROVED"}))
                .with_risk_score(Some(0.12))
                .with_explanation(Some("within limits".to_string())),
        )
        .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"status": "APPROVED"})));
        assert_eq!(task.risk_score, Some(0.12));
        assert!(task.completed_at.is_some());
        assert!(task.duration_ms().is_some());
        assert_eq!(task.revision, 2);
    }

    #[test]
    fn test_terminal_task_rejects_updates() {
        let mut task = transfer_task();
        task.apply(TaskUpdate::rejected("no agent available")).unwrap();
        assert_eq!(task.error.as_deref(), Some("no agent available"));
        assert_eq!(task.explanation.as_deref(), Some("no agent available"));

        let snapshot = task.clone();
        assert_matches!(
            task.apply(TaskUpdate::status(TaskStatus::Processing)),
            Err(Error::StateTransition { .. })
        );
        assert_matches!(
            task.apply(TaskUpdate::default().with_error("late")),
            Err(Error::StateTransition { .. })
        );
        assert_eq!(task, snapshot);
    }

    #[test]
    fn test_skipping_processing_is_rejected() {
        let mut task = transfer_task();
        let err = task
            .apply(TaskUpdate::status(TaskStatus::Completed).with_result(json!({})))
            .unwrap_err();

        assert_matches!(err, Error::StateTransition { .. });
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result.is_none());
    }

    #[test]
    fn test_field_only_update_keeps_status() {
        let mut task = transfer_task();
        task.apply(TaskUpdate::default().with_risk_score(Some(0.5)))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.risk_score, Some(0.5));
    }

    #[test]
    fn test_result_projection() {
        let mut task = transfer_task();
        task.apply(TaskUpdate::status(TaskStatus::Processing)).unwrap();
        task.apply(TaskUpdate::failed("agent unreachable")).unwrap();

        let response = TaskResultResponse::from(&task);
        assert_eq!(response.task_id, task.task_id);
        assert_eq!(response.status, TaskStatus::Failed);
        assert_eq!(response.error.as_deref(), Some("agent unreachable"));
        assert_eq!(response.completed_at, task.completed_at);

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["status"], json!("FAILED"));
        assert!(wire["result"].is_null());
    }

    #[test]
    fn test_expiry() {
        let mut task = transfer_task();
        let now = Utc::now();
        assert!(!task.is_expired(now));

        task.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(task.is_expired(now));
    }
}
