//! Start-up data: the demonstration agent pool

use tracing::{info, warn};

use banking_mcp_core::{AgentRegistration, AgentType};
use banking_mcp_storage::AgentRegistry;

/// The five platform agents on their conventional local ports
pub fn default_agents() -> Vec<AgentRegistration> {
    vec![
        AgentRegistration::new("Banking Agent", AgentType::BANKING, "http://localhost:8001")
            .capabilities(["CHECK_BALANCE", "GET_STATEMENT", "FUND_TRANSFER"]),
        AgentRegistration::new("Fraud Detection Agent", AgentType::FRAUD, "http://localhost:8002")
            .capabilities(["FRAUD_CHECK", "RISK_ASSESSMENT"]),
        AgentRegistration::new("Guardrail Agent", AgentType::GUARDRAIL, "http://localhost:8003")
            .capabilities(["GUARDRAIL_CHECK", "RULE_VALIDATION"]),
        AgentRegistration::new("Clearance Agent", AgentType::CLEARANCE, "http://localhost:8004")
            .capabilities(["LOAN_APPROVAL", "CLEARANCE_DECISION"]),
        AgentRegistration::new("Scoring Agent", AgentType::SCORING, "http://localhost:8005")
            .capabilities(["CREDIT_SCORE", "RISK_SCORE"]),
    ]
}

/// Register the default agents once the registry has loaded, unless it already holds agents
pub async fn seed_default_agents(registry: &AgentRegistry) -> usize {
    registry.wait_until_loaded().await;
    if registry.count().await > 0 {
        info!("Agents restored from store, skipping default agents");
        return 0;
    }

    let mut seeded = 0;
    for registration in default_agents() {
        let name = registration.name.clone();
        match registry.register(registration).await {
            Ok(agent) => {
                info!(agent_id = %agent.agent_id, agent = %name, "Registered default agent");
                seeded += 1;
            }
            Err(err) => warn!(agent = %name, error = %err, "Failed to register default agent"),
        }
    }
    seeded
}
