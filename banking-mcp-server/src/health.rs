//! Periodic agent health probing

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use banking_mcp_core::AgentStatus;
use banking_mcp_storage::AgentRegistry;

use crate::dispatch::AgentClient;

/// Outcome of one probing round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthSweep {
    pub healthy: usize,
    pub unhealthy: usize,
}

pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    client: Arc<dyn AgentClient>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<AgentRegistry>, client: Arc<dyn AgentClient>, interval: Duration) -> Self {
        Self {
            registry,
            client,
            interval,
        }
    }

    /// Probe every registered agent once and record what was observed.
    ///
    /// Agents are never removed, only marked.
    pub async fn sweep(&self) -> HealthSweep {
        let mut sweep = HealthSweep::default();

        for agent in self.registry.list_all().await {
            let status = match self.client.probe(&agent).await {
                Ok(()) => AgentStatus::Healthy,
                Err(err) => {
                    debug!(agent_id = %agent.agent_id, error = %err, "Health probe failed");
                    AgentStatus::Unhealthy
                }
            };

            match status {
                AgentStatus::Healthy => sweep.healthy += 1,
                _ => sweep.unhealthy += 1,
            }

            if self.registry.record_probe(&agent, status).await.is_some() {
                if status == AgentStatus::Healthy {
                    info!(agent_id = %agent.agent_id, name = %agent.name, "Agent is healthy again");
                } else {
                    warn!(agent_id = %agent.agent_id, name = %agent.name, "Agent marked unhealthy");
                }
            }
        }

        sweep
    }

    /// Run [`HealthMonitor::sweep`] every interval, first one interval from now
    pub fn spawn(self) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "Starting agent health monitor");
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sweep = self.sweep().await;
                debug!(healthy = sweep.healthy, unhealthy = sweep.unhealthy, "Health sweep finished");
            }
        })
    }
}
