//! Agent domain model and related types
//!
//! An agent is an executor service registered with the orchestrator. It
//! declares an agent type (a business-domain tag such as `BANKING` or
//! `FRAUD`), the task types it can serve and an HTTP endpoint the
//! orchestrator dispatches work to.
//!
//! # Examples
//!
//! ```rust
//! use banking_mcp_core::agent::*;
//!
//! let registration = AgentRegistration::new("Banking Agent", "BANKING", "http://localhost:8001")
//!     .capability("TRANSFER_NEFT")
//!     .capability("CHECK_BALANCE");
//!
//! let agent = Agent::from_registration(registration).unwrap();
//! assert!(agent.is_routable());
//! assert!(agent.has_capability("TRANSFER_NEFT"));
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ids, value::ValueMap, Error, Result};

/// Open-ended agent category tag, compared exactly
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentType(String);

impl AgentType {
    pub const BANKING: &'static str = "BANKING";
    pub const FRAUD: &'static str = "FRAUD";
    pub const GUARDRAIL: &'static str = "GUARDRAIL";
    pub const CLEARANCE: &'static str = "CLEARANCE";
    pub const SCORING: &'static str = "SCORING";

    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Coarse health status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Healthy => "HEALTHY",
            AgentStatus::Unhealthy => "UNHEALTHY",
            AgentStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HEALTHY" => Ok(AgentStatus::Healthy),
            "UNHEALTHY" => Ok(AgentStatus::Unhealthy),
            "UNKNOWN" => Ok(AgentStatus::Unknown),
            other => Err(Error::validation(format!("Unknown agent status: {other}"))),
        }
    }
}

/// A registered executor agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_endpoint: Option<String>,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    /// Per-agent routing hints
    #[serde(default)]
    pub rules: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    /// Health probe path, relative to `endpoint`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
    pub last_health_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every mutation
    #[serde(default)]
    pub revision: u64,
}

impl Agent {
    /// Build a new agent from a validated registration request
    pub fn from_registration(registration: AgentRegistration) -> Result<Self> {
        registration.validate()?;

        let now = Utc::now();
        Ok(Self {
            agent_id: registration.agent_id.unwrap_or_else(ids::new_agent_id),
            name: registration.name,
            agent_type: AgentType::from(registration.agent_type),
            endpoint: registration.endpoint,
            grpc_endpoint: registration.grpc_endpoint,
            status: AgentStatus::Healthy,
            capabilities: registration.capabilities,
            rules: registration.rules,
            metadata: registration.metadata,
            health_check: registration.health_check,
            last_health_at: now,
            registered_at: now,
            updated_at: now,
            revision: 0,
        })
    }

    /// Only healthy agents take part in routing
    pub fn is_routable(&self) -> bool {
        self.status == AgentStatus::Healthy
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Record a health observation
    pub fn set_status(&mut self, status: AgentStatus) {
        let now = Utc::now();
        self.status = status;
        self.last_health_at = now;
        self.updated_at = now;
        self.revision += 1;
    }

    /// URL probed by the health monitor
    pub fn health_url(&self) -> String {
        let path = self.health_check.as_deref().unwrap_or("/health");
        join_url(&self.endpoint, path)
    }

    /// URL receiving dispatched tasks
    pub fn process_url(&self, process_path: &str) -> String {
        join_url(&self.endpoint, process_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Inbound agent registration request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentRegistration {
    /// Caller-supplied identity; a new one is minted when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub agent_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_endpoint: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub rules: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
}

impl AgentRegistration {
    pub fn new<S1, S2, S3>(name: S1, agent_type: S2, endpoint: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Use a fixed identity instead of minting one
    pub fn with_id<S: Into<String>>(mut self, agent_id: S) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn capability<S: Into<String>>(mut self, capability: S) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(|c| c.into()));
        self
    }

    pub fn metadata<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn health_check<S: Into<String>>(mut self, path: S) -> Self {
        self.health_check = Some(path.into());
        self
    }

    /// Validate required fields
    pub fn validate(&self) -> Result<()> {
        if let Some(agent_id) = &self.agent_id {
            if agent_id.trim().is_empty() {
                return Err(Error::validation("Agent ID cannot be blank when supplied"));
            }
        }
        if self.name.trim().is_empty() {
            return Err(Error::validation("Agent name is required"));
        }
        if self.agent_type.trim().is_empty() {
            return Err(Error::validation("Agent type is required"));
        }
        Self::validate_endpoint(&self.endpoint)?;
        if self.capabilities.is_empty() {
            return Err(Error::validation("Agent must have at least one capability"));
        }
        if self.capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::validation("Capability cannot be empty"));
        }
        Ok(())
    }

    fn validate_endpoint(endpoint: &str) -> Result<()> {
        if endpoint.trim().is_empty() {
            return Err(Error::validation("Endpoint is required"));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::validation(
                "Endpoint must be a valid HTTP or HTTPS URL",
            ));
        }
        Ok(())
    }
}
