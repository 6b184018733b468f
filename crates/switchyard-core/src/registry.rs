//! Agent Registry
//!
//! Indexes registered agents by ID and by type. Each index has its own
//! reader/writer lock; lookups never contend with each other.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::agent::{Agent, AgentId, AgentStatus, AgentType};
use crate::error::{Error, Result};
use crate::event_bus::{Event, EventBus, EventKind};

const SOURCE: &str = "registry";

/// Registry of live agents
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Arc<dyn Agent>>>,
    by_type: RwLock<HashMap<AgentType, BTreeSet<AgentId>>>,
    events: EventBus,
    stop_timeout: Duration,
}

impl AgentRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(events: EventBus, stop_timeout: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            by_type: RwLock::new(HashMap::new()),
            events,
            stop_timeout,
        }
    }

    /// Register an agent.
    ///
    /// Fails with `AlreadyRegistered` and leaves the registry untouched when
    /// the ID is taken.
    pub async fn register(&self, agent: Arc<dyn Agent>) -> Result<()> {
        let agent_id = agent.id().to_string();
        let agent_type = agent.agent_type().to_string();
        let capabilities = agent.capabilities();

        {
            let mut agents = self.agents.write().await;
            if agents.contains_key(&agent_id) {
                return Err(Error::AlreadyRegistered(agent_id));
            }
            agents.insert(agent_id.clone(), agent);
            // Taken while holding the ID lock so unregister never sees a
            // half-indexed agent.
            self.by_type
                .write()
                .await
                .entry(agent_type.clone())
                .or_default()
                .insert(agent_id.clone());
        }

        info!(agent_id = %agent_id, agent_type = %agent_type, "Agent registered");
        self.events.emit(Event::new(
            SOURCE,
            EventKind::AgentRegistered {
                agent_id,
                agent_type,
                capabilities,
            },
        ));
        Ok(())
    }

    /// Stop and remove an agent.
    ///
    /// The agent's graceful stop runs first, bounded by the stop timeout. A
    /// failed or timed-out stop aborts the unregistration.
    pub async fn unregister(&self, agent_id: &str) -> Result<()> {
        let agent = self
            .get(agent_id)
            .await
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

        match tokio::time::timeout(self.stop_timeout, agent.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(agent_id, error = %e, "Agent stop failed, keeping registration");
                return Err(Error::StopFailed {
                    agent_id: agent_id.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(agent_id, timeout_secs = self.stop_timeout.as_secs(), "Agent stop timed out");
                return Err(Error::StopFailed {
                    agent_id: agent_id.to_string(),
                    reason: format!("stop exceeded {:?}", self.stop_timeout),
                });
            }
        }

        {
            let mut agents = self.agents.write().await;
            let removed = agents
                .remove(agent_id)
                .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
            let mut by_type = self.by_type.write().await;
            if let Some(ids) = by_type.get_mut(removed.agent_type()) {
                ids.remove(agent_id);
                if ids.is_empty() {
                    by_type.remove(removed.agent_type());
                }
            }
        }

        info!(agent_id, "Agent unregistered");
        self.events.emit(Event::new(
            SOURCE,
            EventKind::AgentUnregistered {
                agent_id: agent_id.to_string(),
            },
        ));
        Ok(())
    }

    /// Look up an agent by ID
    pub async fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Whether an agent is registered
    pub async fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    /// All agents, ordered by ID
    pub async fn list(&self) -> Vec<Arc<dyn Agent>> {
        let agents = self.agents.read().await;
        let mut list: Vec<_> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.id().cmp(b.id()));
        list
    }

    /// Agents of a given type, ordered by ID
    pub async fn list_by_type(&self, agent_type: &str) -> Vec<Arc<dyn Agent>> {
        let ids: Vec<AgentId> = match self.by_type.read().await.get(agent_type) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };
        let agents = self.agents.read().await;
        ids.iter().filter_map(|id| agents.get(id).cloned()).collect()
    }

    /// Registered IDs, sorted
    pub async fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<_> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered agents
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether no agent is registered
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Number of agents per reported status
    pub async fn status_counts(&self) -> HashMap<AgentStatus, usize> {
        let agents = self.agents.read().await;
        let mut counts = HashMap::new();
        for agent in agents.values() {
            *counts.entry(agent.state().status).or_insert(0) += 1;
        }
        counts
    }
}
