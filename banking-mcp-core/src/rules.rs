//! Declarative routing rules and the rule engine
//!
//! A [`Rule`] maps a [`Condition`] over the routing context to a target agent
//! type with a priority and a weight. The [`RuleEngine`] holds the active
//! [`RuleSet`] behind an atomic pointer: uploads replace the whole set in one
//! swap, and every evaluation runs against a single snapshot.
//!
//! Conditions are a tagged JSON union:
//!
//! ```json
//! {"type": "all", "conditions": [
//!     {"type": "intent", "any_of": ["TRANSFER_NEFT", "TRANSFER_RTGS"]},
//!     {"type": "transaction_field", "field": "amount", "op": "gt", "value": 50000}
//! ]}
//! ```

use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::agent::AgentType;
use crate::routing::{RiskLevel, RoutingContext};
use crate::value::kind_of;
use crate::{Error, Result};

/// Comparison operator for transaction field conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl CompareOp {
    fn is_ordering(&self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte)
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
        }
    }
}

/// Predicate over a [`RoutingContext`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Intent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        equals: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        any_of: Vec<String>,
    },
    Channel {
        equals: String,
    },
    /// Unset risk never matches
    RiskAtLeast {
        level: RiskLevel,
    },
    TransactionField {
        field: String,
        op: CompareOp,
        value: Value,
    },
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
    Always,
}

impl Condition {
    pub fn intent<S: Into<String>>(intent: S) -> Self {
        Condition::Intent {
            equals: Some(intent.into()),
            any_of: Vec::new(),
        }
    }

    pub fn intent_any_of<I, S>(intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition::Intent {
            equals: None,
            any_of: intents.into_iter().map(Into::into).collect(),
        }
    }

    pub fn channel<S: Into<String>>(channel: S) -> Self {
        Condition::Channel {
            equals: channel.into(),
        }
    }

    pub fn risk_at_least(level: RiskLevel) -> Self {
        Condition::RiskAtLeast { level }
    }

    pub fn field<S: Into<String>>(field: S, op: CompareOp, value: Value) -> Self {
        Condition::TransactionField {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Condition::Intent { equals, any_of } => {
                let has_equals = equals.as_deref().is_some_and(|i| !i.trim().is_empty());
                if !has_equals && any_of.is_empty() {
                    return Err(Error::validation(
                        "intent condition needs `equals` or a non-empty `any_of`",
                    ));
                }
                if any_of.iter().any(|i| i.trim().is_empty()) {
                    return Err(Error::validation("intent condition contains a blank intent"));
                }
            }
            Condition::Channel { equals } => {
                if equals.trim().is_empty() {
                    return Err(Error::validation("channel condition needs a channel"));
                }
            }
            Condition::TransactionField { field, op, value } => {
                if field.trim().is_empty() {
                    return Err(Error::validation("transaction_field condition needs a field"));
                }
                if op.is_ordering() && value.as_f64().is_none() {
                    return Err(Error::validation(format!(
                        "transaction_field `{field}` compares with {op:?} against a non-numeric value"
                    )));
                }
            }
            Condition::All { conditions } | Condition::Any { conditions } => {
                if conditions.is_empty() {
                    return Err(Error::validation("composite condition has no members"));
                }
                for condition in conditions {
                    condition.validate()?;
                }
            }
            Condition::RiskAtLeast { .. } | Condition::Always => {}
        }
        Ok(())
    }

    pub fn matches(&self, context: &RoutingContext) -> bool {
        match self {
            Condition::Intent { equals, any_of } => {
                equals.as_deref() == Some(context.intent.as_str())
                    || any_of.iter().any(|i| *i == context.intent)
            }
            Condition::Channel { equals } => *equals == context.channel,
            Condition::RiskAtLeast { level } => {
                context.risk_level.is_some_and(|risk| risk >= *level)
            }
            Condition::TransactionField { field, op, value } => {
                match_field(context, field, *op, value)
            }
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(context)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.matches(context)),
            Condition::Always => true,
        }
    }
}

fn match_field(context: &RoutingContext, field: &str, op: CompareOp, expected: &Value) -> bool {
    let Some(actual) = context.transaction_data.get(field).filter(|v| !v.is_null()) else {
        debug!(field, intent = %context.intent, "Transaction field absent, condition is false");
        return false;
    };

    if let (Some(lhs), Some(rhs)) = (actual.as_f64(), expected.as_f64()) {
        return lhs.partial_cmp(&rhs).is_some_and(|ordering| op.holds(ordering));
    }

    if op.is_ordering() || kind_of(actual) != kind_of(expected) {
        warn!(
            field,
            found = kind_of(actual),
            expected = kind_of(expected),
            "Transaction field has an unexpected type, condition is false"
        );
        return false;
    }

    match op {
        CompareOp::Eq => actual == expected,
        CompareOp::Ne => actual != expected,
        _ => false,
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

/// A declarative routing rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub name: String,
    pub condition: Condition,
    pub agent_type: AgentType,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Rule {
    pub fn new<S: Into<String>>(name: S, condition: Condition, agent_type: &str) -> Self {
        Self {
            name: name.into(),
            condition,
            agent_type: AgentType::new(agent_type),
            priority: 0,
            weight: default_weight(),
            enabled: true,
            reason: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_type.as_str().trim().is_empty() {
            return Err(Error::validation(format!(
                "rule `{}` has no agent_type",
                self.name
            )));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(Error::validation(format!(
                "rule `{}` weight must be a finite non-negative number",
                self.name
            )));
        }
        self.condition.validate()
    }
}

/// An agent type with its aggregate rule score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredType {
    pub agent_type: AgentType,
    pub score: f64,
    /// Names of the rules that contributed, in evaluation order
    pub matched_rules: Vec<String>,
}

/// Result of evaluating a rule set against a context
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Agent types by descending score
    Ranked(Vec<ScoredType>),
    NoDecision,
}

impl Evaluation {
    pub fn ranked(&self) -> &[ScoredType] {
        match self {
            Evaluation::Ranked(ranked) => ranked,
            Evaluation::NoDecision => &[],
        }
    }
}

/// A versioned, ordered collection of rules
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub version: u64,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Score agent types for `context`.
    ///
    /// Enabled rules are visited by descending priority, declaration order
    /// breaking ties. Types tied on score keep the order in which they first
    /// received a contribution.
    pub fn evaluate(&self, context: &RoutingContext) -> Evaluation {
        let mut ordered: Vec<&Rule> = self.rules.iter().filter(|r| r.enabled).collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut scores: Vec<ScoredType> = Vec::new();
        for rule in ordered {
            if !rule.condition.matches(context) {
                continue;
            }
            debug!(rule = %rule.name, agent_type = %rule.agent_type, "Rule matched");
            match scores.iter_mut().find(|s| s.agent_type == rule.agent_type) {
                Some(entry) => {
                    entry.score += rule.weight;
                    entry.matched_rules.push(rule.name.clone());
                }
                None => scores.push(ScoredType {
                    agent_type: rule.agent_type.clone(),
                    score: rule.weight,
                    matched_rules: vec![rule.name.clone()],
                }),
            }
        }

        scores.retain(|s| s.score > 0.0);
        if scores.is_empty() {
            return Evaluation::NoDecision;
        }
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Evaluation::Ranked(scores)
    }

    /// Highest score `agent_type` can reach: the weight of every enabled rule targeting it
    pub fn max_score(&self, agent_type: &AgentType) -> f64 {
        self.rules
            .iter()
            .filter(|r| r.enabled && r.agent_type == *agent_type)
            .map(|r| r.weight)
            .sum()
    }

    /// Normalized score in `[0, 1]`
    pub fn confidence(&self, scored: &ScoredType) -> f64 {
        let max = self.max_score(&scored.agent_type);
        if max <= 0.0 {
            return 0.0;
        }
        (scored.score / max).clamp(0.0, 1.0)
    }

    fn validate(rules: &mut [Rule]) -> Result<()> {
        for (index, rule) in rules.iter_mut().enumerate() {
            if rule.name.trim().is_empty() {
                rule.name = format!("rule-{}", index + 1);
            }
            rule.validate()?;
        }
        Ok(())
    }
}

/// Parse an uploaded rule document: `{"rules": [...]}` or a bare array
pub fn parse_rule_document(document: Value) -> Result<Vec<Rule>> {
    let rules = match document {
        Value::Array(_) => document,
        Value::Object(mut object) => object
            .remove("rules")
            .ok_or_else(|| Error::validation("rule document has no `rules` array"))?,
        other => {
            return Err(Error::validation(format!(
                "rule document must be an object or an array, got {}",
                kind_of(&other)
            )))
        }
    };

    serde_json::from_value(rules)
        .map_err(|e| Error::validation(format!("malformed rule document: {e}")))
}

/// Intents that move money between accounts
pub const TRANSFER_INTENTS: [&str; 4] = ["TRANSFER_NEFT", "TRANSFER_RTGS", "TRANSFER_IMPS", "TRANSFER_UPI"];

/// The built-in rule set for the banking agent pool.
///
/// Transfers go straight to BANKING unless they are high risk or name a
/// destination account, in which case GUARDRAIL outranks BANKING. Intents no
/// rule covers are left to the router's fallback.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "transfer-guardrail",
            Condition::All {
                conditions: vec![
                    Condition::intent_any_of(TRANSFER_INTENTS),
                    Condition::Any {
                        conditions: vec![
                            Condition::risk_at_least(RiskLevel::High),
                            Condition::field("to_account", CompareOp::Ne, Value::from("")),
                        ],
                    },
                ],
            },
            AgentType::GUARDRAIL,
        )
        .priority(10)
        .weight(2.0)
        .reason("Transaction requires guardrail validation"),
        Rule::new(
            "transfer-banking",
            Condition::intent_any_of(TRANSFER_INTENTS),
            AgentType::BANKING,
        )
        .reason("Standard banking transaction"),
        Rule::new(
            "account-enquiry",
            Condition::intent_any_of(["CHECK_BALANCE", "GET_STATEMENT", "VIEW_ACCOUNT"]),
            AgentType::BANKING,
        )
        .reason("Account inquiry operation"),
        Rule::new(
            "beneficiary-guardrail",
            Condition::intent_any_of(["ADD_BENEFICIARY", "MANAGE_BENEFICIARY"]),
            AgentType::GUARDRAIL,
        )
        .reason("Beneficiary management requires validation"),
        Rule::new(
            "loan-clearance",
            Condition::intent_any_of(["APPLY_LOAN", "LOAN_APPROVAL"]),
            AgentType::CLEARANCE,
        )
        .reason("Loan application requires clearance"),
        Rule::new(
            "scoring",
            Condition::intent_any_of(["CREDIT_SCORE", "RISK_ASSESSMENT"]),
            AgentType::SCORING,
        )
        .reason("Credit or risk scoring operation"),
    ]
}

/// Holds the active rule set and evaluates contexts against it
#[derive(Debug)]
pub struct RuleEngine {
    active: ArcSwap<RuleSet>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// An engine with no rules; every evaluation yields no decision
    pub fn new() -> Self {
        Self {
            active: ArcSwap::from_pointee(RuleSet::default()),
        }
    }

    pub fn with_default_rules() -> Self {
        let engine = Self::new();
        let mut rules = default_rules();
        if let Err(err) = RuleSet::validate(&mut rules) {
            error!(error = %err, "Built-in rules failed validation");
        }
        engine.install(rules);
        engine
    }

    /// Validate and atomically replace the whole rule set
    pub fn upload(&self, mut rules: Vec<Rule>) -> Result<Arc<RuleSet>> {
        RuleSet::validate(&mut rules)?;
        let installed = self.install(rules);
        info!(
            version = installed.version,
            count = installed.len(),
            "Rule set replaced"
        );
        Ok(installed)
    }

    /// Upload from a free-form JSON document
    pub fn upload_document(&self, document: Value) -> Result<Arc<RuleSet>> {
        self.upload(parse_rule_document(document)?)
    }

    fn install(&self, rules: Vec<Rule>) -> Arc<RuleSet> {
        let previous = self.active.rcu(|current| RuleSet {
            version: current.version + 1,
            rules: rules.clone(),
        });
        Arc::new(RuleSet {
            version: previous.version + 1,
            rules,
        })
    }

    /// Owned copy of the active rule set
    pub fn rules(&self) -> RuleSet {
        RuleSet::clone(&self.active.load())
    }

    /// Shared handle to the active rule set
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.active.load_full()
    }

    pub fn version(&self) -> u64 {
        self.active.load().version
    }

    pub fn evaluate(&self, context: &RoutingContext) -> Evaluation {
        self.snapshot().evaluate(context)
    }

    /// Replace the rule set with the document stored at `path`
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<Arc<RuleSet>> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| Error::validation(format!("{}: {e}", path.display())))?;
        let installed = self.upload_document(document)?;
        info!(path = %path.display(), version = installed.version, "Loaded rules from file");
        Ok(installed)
    }

    /// Write the active rule set to `path` as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let snapshot = self.snapshot();
        fs::write(path, serde_json::to_string_pretty(&*snapshot)?)?;
        debug!(path = %path.display(), version = snapshot.version, "Saved rules to file");
        Ok(())
    }
}
