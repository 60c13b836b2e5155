//! Agent registry
//!
//! The in-memory index is authoritative. The durable store, when present, is
//! written through opportunistically and read only on a memory miss. Store
//! failures degrade the shared gate and never reach the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use banking_mcp_core::{Agent, AgentRegistration, AgentStatus, AgentType, Error, Result};

use crate::gate::GatedStore;

/// Registry of executor agents
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
    store: Option<GatedStore<Agent>>,
    loaded: watch::Sender<bool>,
}

impl AgentRegistry {
    /// Create a registry, optionally backed by a durable store
    pub fn new(store: Option<GatedStore<Agent>>) -> Self {
        let (loaded, _) = watch::channel(store.is_none());
        Self {
            agents: RwLock::new(HashMap::new()),
            store,
            loaded,
        }
    }

    /// A memory-only registry
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Register a new agent. Status starts HEALTHY.
    ///
    /// Re-registering a caller-supplied id replaces the previous record, and
    /// the replacement carries a higher revision than any stored copy.
    pub async fn register(&self, registration: AgentRegistration) -> Result<Agent> {
        let caller_id = registration.agent_id.is_some();
        let mut agent = Agent::from_registration(registration)?;

        let stored_revision = match &self.store {
            Some(store) if caller_id => store.find(&agent.agent_id).await.map(|a| a.revision),
            _ => None,
        };

        info!(
            agent_id = %agent.agent_id,
            name = %agent.name,
            agent_type = %agent.agent_type,
            endpoint = %agent.endpoint,
            "Registering agent"
        );

        {
            let mut agents = self.agents.write().await;
            let previous = agents
                .get(&agent.agent_id)
                .map(|existing| existing.revision)
                .into_iter()
                .chain(stored_revision)
                .max();
            if let Some(revision) = previous {
                agent.revision = revision + 1;
                info!(agent_id = %agent.agent_id, revision = agent.revision, "Replacing registered agent");
            }
            agents.insert(agent.agent_id.clone(), agent.clone());
        }
        self.persist(&agent).await;

        Ok(agent)
    }

    /// Memory-first lookup, falling back to the store while it is available
    pub async fn get(&self, agent_id: &str) -> Result<Agent> {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            return Ok(agent.clone());
        }

        if let Some(store) = &self.store {
            if let Some(agent) = store.find(agent_id).await {
                debug!(agent_id, "Agent loaded from durable store");
                let mut agents = self.agents.write().await;
                let cached = agents.entry(agent.agent_id.clone()).or_insert(agent);
                return Ok(cached.clone());
            }
        }

        Err(Error::not_found("Agent", agent_id))
    }

    /// Healthy agents of `agent_type`, by registration time then id
    pub async fn find_by_type(&self, agent_type: &AgentType) -> Vec<Agent> {
        self.select(|agent| agent.agent_type == *agent_type).await
    }

    /// Healthy agents declaring `capability`, by registration time then id
    pub async fn find_by_capability(&self, capability: &str) -> Vec<Agent> {
        self.select(|agent| agent.has_capability(capability)).await
    }

    async fn select<F>(&self, predicate: F) -> Vec<Agent>
    where
        F: Fn(&Agent) -> bool,
    {
        let mut matches: Vec<Agent> = self
            .agents
            .read()
            .await
            .values()
            .filter(|agent| agent.is_routable() && predicate(agent))
            .cloned()
            .collect();
        sort_for_routing(&mut matches);
        matches
    }

    /// Set an agent's health status
    pub async fn update_status(&self, agent_id: &str, status: AgentStatus) -> Result<Agent> {
        // hydrate from the store if the warm load has not reached this agent yet
        if !self.agents.read().await.contains_key(agent_id) {
            self.get(agent_id).await?;
        }

        let updated = {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| Error::not_found("Agent", agent_id))?;
            let previous = agent.status;
            agent.set_status(status);
            if previous != status {
                info!(agent_id, from = %previous, to = %status, "Agent status changed");
            }
            agent.clone()
        };

        self.persist(&updated).await;
        Ok(updated)
    }

    /// Record a health probe result taken against `snapshot`.
    ///
    /// Writes only when the status differs and the agent is still at the
    /// snapshot's revision, so a change made while the probe was in flight
    /// wins. Returns the updated agent when a write happened.
    pub async fn record_probe(&self, snapshot: &Agent, status: AgentStatus) -> Option<Agent> {
        if snapshot.status == status {
            return None;
        }

        let updated = {
            let mut agents = self.agents.write().await;
            let agent = agents.get_mut(&snapshot.agent_id)?;
            if agent.revision != snapshot.revision {
                debug!(
                    agent_id = %agent.agent_id,
                    probed = %status,
                    "Agent changed during health probe, keeping current status"
                );
                return None;
            }
            info!(agent_id = %agent.agent_id, from = %agent.status, to = %status, "Agent status changed");
            agent.set_status(status);
            agent.clone()
        };

        self.persist(&updated).await;
        Some(updated)
    }

    /// Snapshot of every known agent, by registration time then id
    pub async fn list_all(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        sort_for_routing(&mut agents);
        agents
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether the startup load from the durable store has finished
    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    pub async fn wait_until_loaded(&self) {
        let mut loaded = self.loaded.subscribe();
        // the sender lives as long as self, so this only returns once loaded
        let _ = loaded.wait_for(|done| *done).await;
    }

    /// Load every stored agent into memory.
    ///
    /// Agents registered meanwhile win over their stored copies.
    pub async fn warm_load(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let mut loaded = 0;
        match store.ids().await {
            Some(ids) => {
                for id in ids {
                    let Some(agent) = store.find(&id).await else {
                        continue;
                    };
                    let mut agents = self.agents.write().await;
                    if !agents.contains_key(&id) {
                        agents.insert(id, agent);
                        loaded += 1;
                    }
                }
                info!(loaded, "Agents restored from durable store");
            }
            None => warn!("Skipped agent warm load, durable store unavailable"),
        }

        self.loaded.send_replace(true);
        loaded
    }

    /// Run [`warm_load`](Self::warm_load) in the background
    pub fn spawn_warm_load(self: &Arc<Self>) -> JoinHandle<usize> {
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.warm_load().await })
    }

    /// Write every in-memory agent through to the store.
    ///
    /// Used once the store comes back, so agents registered or updated while
    /// it was degraded become durable. Returns how many were saved.
    pub async fn flush(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let mut saved = 0;
        for agent in self.list_all().await {
            if store.save(&agent).await {
                saved += 1;
            }
        }
        info!(saved, "Agents flushed to durable store");
        saved
    }

    async fn persist(&self, agent: &Agent) {
        if let Some(store) = &self.store {
            if !store.save(agent).await {
                debug!(agent_id = %agent.agent_id, "Agent kept in memory only");
            }
        }
    }
}

/// Deterministic candidate order: earliest registration first, id breaks ties
fn sort_for_routing(agents: &mut [Agent]) {
    agents.sort_by(|a, b| {
        a.registered_at
            .cmp(&b.registered_at)
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
}
