//! Context router
//!
//! Turns the rule engine's ranking into one concrete agent. Ranked agent
//! types are tried in order until one has a healthy agent; the earliest
//! registered agent of that type wins and its peers become alternatives.
//! When no rule matches, agents declaring the intent as a capability are
//! tried, then agents of the fallback type.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use banking_mcp_core::{
    Agent, AgentType, Error, Evaluation, Result, RoutingContext, RoutingDecision, RuleEngine,
    ScoredType,
};
use banking_mcp_storage::AgentRegistry;

/// Confidence reported for decisions made without a matching rule
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

pub struct ContextRouter {
    rules: Arc<RuleEngine>,
    registry: Arc<AgentRegistry>,
    fallback_agent_type: AgentType,
}

impl ContextRouter {
    pub fn new(
        rules: Arc<RuleEngine>,
        registry: Arc<AgentRegistry>,
        fallback_agent_type: AgentType,
    ) -> Self {
        Self {
            rules,
            registry,
            fallback_agent_type,
        }
    }

    /// Pick an agent for `context`, or fail with a routing error
    pub async fn route(&self, mut context: RoutingContext) -> Result<RoutingDecision> {
        let rule_set = self.rules.snapshot();
        context.attach_rule_set(rule_set.clone());

        let ranked = match rule_set.evaluate(&context) {
            Evaluation::Ranked(ranked) => ranked,
            Evaluation::NoDecision => return self.fallback(context).await,
        };

        for scored in &ranked {
            let candidates = self.registry.find_by_type(&scored.agent_type).await;
            let Some((selected, runners_up)) = candidates.split_first() else {
                debug!(
                    intent = %context.intent,
                    agent_type = %scored.agent_type,
                    "No healthy agent for ranked type, trying next"
                );
                continue;
            };

            let confidence = rule_set.confidence(scored);
            let reason = match_reason(scored);
            return Ok(self.decide(selected, runners_up, confidence, reason, false, context));
        }

        let types: Vec<&str> = ranked.iter().map(|s| s.agent_type.as_str()).collect();
        Err(Error::routing(format!(
            "no healthy agent available for agent types [{}]",
            types.join(", ")
        )))
    }

    async fn fallback(&self, context: RoutingContext) -> Result<RoutingDecision> {
        let capable = self.registry.find_by_capability(&context.intent).await;
        if let Some((selected, runners_up)) = capable.split_first() {
            let reason = format!(
                "No rule matched intent {}; fallback to agent declaring capability {}",
                context.intent, context.intent
            );
            return Ok(self.decide(selected, runners_up, FALLBACK_CONFIDENCE, reason, true, context));
        }

        let defaults = self.registry.find_by_type(&self.fallback_agent_type).await;
        if let Some((selected, runners_up)) = defaults.split_first() {
            let reason = format!(
                "No rule matched intent {}; fallback to default agent type {}",
                context.intent, self.fallback_agent_type
            );
            return Ok(self.decide(selected, runners_up, FALLBACK_CONFIDENCE, reason, true, context));
        }

        Err(Error::routing(format!(
            "no rule matched intent {} and no fallback agent is available",
            context.intent
        )))
    }

    fn decide(
        &self,
        selected: &Agent,
        runners_up: &[Agent],
        confidence: f64,
        reason: String,
        fallback: bool,
        context: RoutingContext,
    ) -> RoutingDecision {
        info!(
            intent = %context.intent,
            agent_id = %selected.agent_id,
            agent_type = %selected.agent_type,
            confidence,
            fallback,
            rule_set_version = context.rule_set_version,
            "Routing decision made"
        );

        RoutingDecision {
            agent_id: selected.agent_id.clone(),
            agent_type: selected.agent_type.clone(),
            confidence,
            reason,
            alternatives: runners_up.iter().map(|a| a.agent_id.clone()).collect(),
            fallback,
            context,
            decided_at: Utc::now(),
        }
    }
}

fn match_reason(scored: &ScoredType) -> String {
    format!(
        "Matched rules [{}] for agent type {} (score {:.2})",
        scored.matched_rules.join(", "),
        scored.agent_type,
        scored.score
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use banking_mcp_core::{AgentRegistration, AgentStatus, Condition, RiskLevel, Rule};
    use std::time::Duration;

    async fn register(registry: &AgentRegistry, name: &str, agent_type: &str, capability: &str) -> Agent {
        let agent = registry
            .register(
                AgentRegistration::new(name, agent_type, "http://localhost:8001").capability(capability),
            )
            .await
            .unwrap();
        // distinct registration timestamps
        tokio::time::sleep(Duration::from_millis(2)).await;
        agent
    }

    fn router(rules: Vec<Rule>) -> (ContextRouter, Arc<AgentRegistry>, Arc<RuleEngine>) {
        let engine = Arc::new(RuleEngine::new());
        engine.upload(rules).unwrap();
        let registry = Arc::new(AgentRegistry::in_memory());
        let router = ContextRouter::new(engine.clone(), registry.clone(), AgentType::new("BANKING"));
        (router, registry, engine)
    }

    fn context(intent: &str) -> RoutingContext {
        RoutingContext::new("U1", "sess_1", "MB", intent)
    }

    #[tokio::test]
    async fn test_routes_to_top_ranked_type() {
        let (router, registry, _) = router(vec![
            Rule::new("guardrail", Condition::intent("TRANSFER_NEFT"), "GUARDRAIL"),
            Rule::new("fraud", Condition::risk_at_least(RiskLevel::High), "FRAUD").weight(2.0),
        ]);
        let guardrail = register(&registry, "Guardrail", "GUARDRAIL", "TRANSFER_NEFT").await;
        let fraud = register(&registry, "Fraud", "FRAUD", "FRAUD_CHECK").await;

        let decision = router.route(context("TRANSFER_NEFT")).await.unwrap();
        assert_eq!(decision.agent_id, guardrail.agent_id);
        assert_eq!(decision.confidence, 1.0);
        assert!(!decision.fallback);
        assert_eq!(decision.context.rule_set_version, 1);

        let high_risk = context("TRANSFER_NEFT").with_risk_level(RiskLevel::High);
        let decision = router.route(high_risk).await.unwrap();
        assert_eq!(decision.agent_id, fraud.agent_id);
        assert!(decision.reason.contains("fraud"));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_ranked_type() {
        let (router, registry, _) = router(vec![
            Rule::new("fraud", Condition::Always, "FRAUD").weight(2.0),
            Rule::new("banking", Condition::Always, "BANKING"),
        ]);
        let banking = register(&registry, "Banking", "BANKING", "X").await;

        let decision = router.route(context("ANYTHING")).await.unwrap();
        assert_eq!(decision.agent_id, banking.agent_id);
        assert_eq!(decision.agent_type, AgentType::new("BANKING"));
    }

    #[tokio::test]
    async fn test_no_healthy_agent_is_routing_error() {
        let (router, registry, _) = router(vec![Rule::new("fraud", Condition::Always, "FRAUD")]);
        let fraud = register(&registry, "Fraud", "FRAUD", "X").await;
        registry
            .update_status(&fraud.agent_id, AgentStatus::Unhealthy)
            .await
            .unwrap();

        let err = router.route(context("TRANSFER_NEFT")).await.unwrap_err();
        assert_matches!(err, Error::Routing { .. });
        assert!(err.to_string().contains("FRAUD"));
    }

    #[tokio::test]
    async fn test_selection_is_deterministic_with_alternatives() {
        let (router, registry, _) = router(vec![Rule::new("b", Condition::intent("CHECK_BALANCE"), "BANKING")]);
        let first = register(&registry, "first", "BANKING", "CHECK_BALANCE").await;
        let second = register(&registry, "second", "BANKING", "CHECK_BALANCE").await;
        let third = register(&registry, "third", "BANKING", "CHECK_BALANCE").await;

        for _ in 0..5 {
            let decision = router.route(context("CHECK_BALANCE")).await.unwrap();
            assert_eq!(decision.agent_id, first.agent_id);
            assert_eq!(
                decision.alternatives,
                vec![second.agent_id.clone(), third.agent_id.clone()]
            );
        }
    }

    #[tokio::test]
    async fn test_capability_fallback_when_no_rule_matches() {
        let (router, registry, _) = router(vec![Rule::new("loan", Condition::intent("APPLY_LOAN"), "CLEARANCE")]);
        register(&registry, "Banking", "BANKING", "CHECK_BALANCE").await;
        let scoring = register(&registry, "Scoring", "SCORING", "CREDIT_LIMIT").await;

        let decision = router.route(context("CREDIT_LIMIT")).await.unwrap();
        assert_eq!(decision.agent_id, scoring.agent_id);
        assert!(decision.fallback);
        assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
        assert!(decision.reason.contains("fallback"));
    }

    #[tokio::test]
    async fn test_default_type_fallback() {
        let (router, registry, _) = router(Vec::new());
        let banking = register(&registry, "Banking", "BANKING", "CHECK_BALANCE").await;

        let decision = router.route(context("UNKNOWN_INTENT")).await.unwrap();
        assert_eq!(decision.agent_id, banking.agent_id);
        assert!(decision.fallback);
        assert!(decision.reason.contains("default agent type BANKING"));
    }

    #[tokio::test]
    async fn test_no_rule_and_no_fallback_is_routing_error() {
        let (router, registry, _) = router(Vec::new());
        register(&registry, "Fraud", "FRAUD", "FRAUD_CHECK").await;

        assert_matches!(
            router.route(context("UNKNOWN_INTENT")).await,
            Err(Error::Routing { .. })
        );
    }

    #[tokio::test]
    async fn test_decision_follows_latest_upload() {
        let (router, registry, engine) = router(vec![Rule::new("a", Condition::Always, "FRAUD")]);
        let fraud = register(&registry, "Fraud", "FRAUD", "X").await;
        let scoring = register(&registry, "Scoring", "SCORING", "Y").await;

        let before = router.route(context("X")).await.unwrap();
        assert_eq!(before.agent_id, fraud.agent_id);

        engine
            .upload(vec![Rule::new("b", Condition::Always, "SCORING")])
            .unwrap();
        let after = router.route(context("X")).await.unwrap();
        assert_eq!(after.agent_id, scoring.agent_id);
        assert_eq!(after.context.rule_set_version, 2);
        assert_eq!(before.context.rule_set_version, 1);
    }
}
