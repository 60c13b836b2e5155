//! Per-user session records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{ids, value::ValueMap, Error, Result};

/// Inbound session creation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub context: ValueMap,
}

impl SessionRequest {
    pub fn new<S1: Into<String>, S2: Into<String>>(user_id: S1, channel: S2) -> Self {
        Self {
            user_id: user_id.into(),
            channel: channel.into(),
            context: ValueMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::validation("user_id is required"));
        }
        if self.channel.trim().is_empty() {
            return Err(Error::validation("channel is required"));
        }
        Ok(())
    }
}

/// Conversational context for one user on one channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub channel: String,
    #[serde(default)]
    pub context: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    #[serde(default)]
    pub task_history: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Session {
    pub fn new(request: SessionRequest, ttl: Duration) -> Result<Self> {
        request.validate()?;
        if ttl <= Duration::zero() {
            return Err(Error::validation("Session TTL must be positive"));
        }

        let now = Utc::now();
        Ok(Self {
            session_id: ids::new_session_id(),
            user_id: request.user_id,
            channel: request.channel,
            context: request.context,
            metadata: ValueMap::new(),
            task_history: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            revision: 0,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Shallow-merge `patch` into the context, later keys win
    pub fn merge_context(&mut self, patch: ValueMap) {
        self.context.extend(patch);
        self.touch();
    }

    pub fn record_task<S: Into<String>>(&mut self, task_id: S) {
        self.task_history.push(task_id.into());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_creation() {
        let mut request = SessionRequest::new("U1", "MB");
        request.context.insert("language".into(), json!("en"));

        let session = Session::new(request, Duration::hours(24)).unwrap();
        assert!(session.session_id.starts_with("sess_"));
        assert_eq!(session.context["language"], json!("en"));
        assert!(session.task_history.is_empty());
        assert_eq!(session.expires_at - session.created_at, Duration::hours(24));
        assert!(!session.is_expired(Utc::now()));
    }

    #[test]
    fn test_session_validation() {
        assert!(Session::new(SessionRequest::new("", "MB"), Duration::hours(1)).is_err());
        assert!(Session::new(SessionRequest::new("U1", ""), Duration::hours(1)).is_err());
        assert!(Session::new(SessionRequest::new("U1", "MB"), Duration::zero()).is_err());
    }

    #[test]
    fn test_context_merge_and_history() {
        let mut session = Session::new(SessionRequest::new("U1", "MB"), Duration::hours(1)).unwrap();
        session.context.insert("language".into(), json!("en"));

        let mut patch = ValueMap::new();
        patch.insert("language".into(), json!("hi"));
        patch.insert("last_intent".into(), json!("CHECK_BALANCE"));
        session.merge_context(patch);
        session.record_task("task_1");
        session.record_task("task_2");

        assert_eq!(session.context["language"], json!("hi"));
        assert_eq!(session.context["last_intent"], json!("CHECK_BALANCE"));
        assert_eq!(session.task_history, vec!["task_1", "task_2"]);
        assert_eq!(session.revision, 3);
    }
}
