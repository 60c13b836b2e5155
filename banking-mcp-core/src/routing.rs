//! Routing context and routing decision value objects
//!
//! A [`RoutingContext`] is built fresh for every routing attempt from the
//! task request and the owning session. It is never stored on its own; the
//! [`RoutingDecision`] produced from it embeds a copy for audit.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::AgentType;
use crate::rules::RuleSet;
use crate::task::Task;
use crate::value::{read_field, FieldRead, ValueMap};
use crate::{Error, Result};

/// Amount above which a transaction is classified HIGH risk
pub const HIGH_RISK_AMOUNT: f64 = 100_000.0;
/// Amount above which a transaction is classified MEDIUM risk
pub const MEDIUM_RISK_AMOUNT: f64 = 50_000.0;

/// Coarse risk classification, ordered `LOW < MEDIUM < HIGH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_amount(amount: f64) -> Self {
        if amount > HIGH_RISK_AMOUNT {
            RiskLevel::High
        } else if amount > MEDIUM_RISK_AMOUNT {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            other => Err(Error::validation(format!("Unknown risk level: {other}"))),
        }
    }
}

/// Enriched, per-task view used to make a routing decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RoutingContext {
    pub user_id: String,
    pub session_id: String,
    pub channel: String,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub user_profile: ValueMap,
    #[serde(default)]
    pub transaction_data: ValueMap,
    #[serde(default)]
    pub device_info: ValueMap,
    #[serde(default)]
    pub historical_data: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    /// Version of the rule set the context was evaluated against
    #[serde(default)]
    pub rule_set_version: u64,
    #[serde(skip)]
    pub rule_set: Option<Arc<RuleSet>>,
}

impl RoutingContext {
    pub fn new<S1, S2, S3, S4>(user_id: S1, session_id: S2, channel: S3, intent: S4) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            channel: channel.into(),
            intent: intent.into(),
            ..Default::default()
        }
    }

    /// Build the context for `task`, folding in the owning session's context.
    ///
    /// The transaction payload is the task data. Profile, device and history
    /// maps come from the matching keys of the request context when those
    /// hold objects. Risk is derived from `data.amount`, or taken from an
    /// explicit `context.risk_level` when there is no numeric amount.
    pub fn from_task(task: &Task, session_context: &ValueMap) -> Self {
        let mut context = Self::new(
            task.user_id.clone(),
            task.session_id.clone().unwrap_or_default(),
            task.channel.clone(),
            task.intent.clone(),
        );

        context.transaction_data = task.data.clone();
        context.user_profile = object_field(&task.context, "user_profile", &task.task_id);
        context.device_info = object_field(&task.context, "device_info", &task.task_id);
        context.historical_data = object_field(&task.context, "historical_data", &task.task_id);
        context.risk_level = assess_risk(task);

        context.metadata = session_context.clone();
        context
            .metadata
            .insert("task_id".into(), task.task_id.clone().into());

        context
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    pub fn with_transaction<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.transaction_data.insert(key.into(), value);
        self
    }

    /// Pin the rule set snapshot this context is evaluated against
    pub fn attach_rule_set(&mut self, rule_set: Arc<RuleSet>) {
        self.rule_set_version = rule_set.version;
        self.rule_set = Some(rule_set);
    }
}

fn object_field(map: &ValueMap, key: &str, task_id: &str) -> ValueMap {
    match read_field::<ValueMap>(map, key) {
        FieldRead::Present(object) => object,
        FieldRead::Absent => ValueMap::new(),
        FieldRead::Mistyped { found } => {
            warn!(task_id = %task_id, field = key, found, "Ignoring non-object context field");
            ValueMap::new()
        }
    }
}

fn assess_risk(task: &Task) -> Option<RiskLevel> {
    match read_field::<f64>(&task.data, "amount") {
        FieldRead::Present(amount) => return Some(RiskLevel::from_amount(amount)),
        FieldRead::Mistyped { found } => {
            warn!(task_id = %task.task_id, found, "Transaction amount is not numeric");
        }
        FieldRead::Absent => {}
    }

    match read_field::<String>(&task.context, "risk_level") {
        FieldRead::Present(level) => match level.parse() {
            Ok(level) => Some(level),
            Err(err) => {
                warn!(task_id = %task.task_id, error = %err, "Ignoring explicit risk level");
                None
            }
        },
        FieldRead::Mistyped { found } => {
            warn!(task_id = %task.task_id, found, "Explicit risk level is not a string");
            None
        }
        FieldRead::Absent => None,
    }
}

/// Outcome of one routing attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub agent_id: String,
    pub agent_type: AgentType,
    /// In `[0.0, 1.0]`
    pub confidence: f64,
    pub reason: String,
    /// Runner-up agents of the selected type, in selection order
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Set when no rule matched and a fallback lookup picked the agent
    #[serde(default)]
    pub fallback: bool,
    pub context: RoutingContext,
    pub decided_at: DateTime<Utc>,
}
