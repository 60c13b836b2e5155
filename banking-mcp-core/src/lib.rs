//! Core domain models for the banking MCP orchestration server
//!
//! This crate contains the task, agent and session models, the routing
//! context and decision value objects, and the rule engine that ranks agent
//! types for a task. It has no I/O beyond rule file loading; persistence and
//! transport live in the storage and server crates.

pub mod agent;
pub mod error;
pub mod ids;
pub mod routing;
pub mod rules;
pub mod session;
pub mod task;
pub mod value;

pub use agent::{Agent, AgentRegistration, AgentStatus, AgentType};
pub use error::{Error, Result};
pub use routing::{RiskLevel, RoutingContext, RoutingDecision};
pub use rules::{Condition, Evaluation, Rule, RuleEngine, RuleSet, ScoredType};
pub use session::{Session, SessionRequest};
pub use task::{Task, TaskAccepted, TaskRequest, TaskResultResponse, TaskStatus, TaskUpdate};
pub use value::ValueMap;
