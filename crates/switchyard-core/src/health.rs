//! Health Monitor
//!
//! Periodically aggregates agent, task and queue state into a
//! [`SystemHealth`] snapshot, persists it and reports status changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentStatus;
use crate::config::HealthConfig;
use crate::correlator::ResponseCorrelator;
use crate::event_bus::{Event, EventBus, EventKind};
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;
use crate::store::PersistentStore;
use crate::task::{TaskBoard, TaskStatus};

const SOURCE: &str = "health";

/// Overall system status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything nominal
    #[default]
    Healthy,
    /// Some agents faulted or the message queue is backing up
    Degraded,
    /// More than half of the agents faulted
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Point-in-time health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Classified status
    pub status: HealthStatus,
    /// Registered agents
    pub total_agents: usize,
    /// Agents per status
    pub agent_status: HashMap<AgentStatus, usize>,
    /// Tasks per status
    pub task_status: HashMap<TaskStatus, usize>,
    /// Messages waiting for dispatch
    pub message_queue_depth: usize,
    /// Message queue capacity
    pub message_queue_capacity: usize,
    /// Events waiting for processing
    pub event_queue_depth: usize,
    /// Events dropped since start
    pub dropped_events: u64,
    /// Registered reply handlers
    pub pending_replies: usize,
    /// Orphaned replies held
    pub orphaned_replies: usize,
    /// When the snapshot was taken
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Agents currently in `Error`
    #[must_use]
    pub fn error_agents(&self) -> usize {
        self.agent_status
            .get(&AgentStatus::Error)
            .copied()
            .unwrap_or(0)
    }
}

/// Classify a snapshot.
///
/// `Critical` when more than half of the agents are in `Error`, `Degraded`
/// when any is or when the message queue is above `high_water` of its
/// capacity.
#[must_use]
pub fn classify(
    total_agents: usize,
    error_agents: usize,
    queue_depth: usize,
    queue_capacity: usize,
    high_water: f64,
) -> HealthStatus {
    if total_agents > 0 && error_agents * 2 > total_agents {
        return HealthStatus::Critical;
    }
    let backlog = queue_capacity > 0 && queue_depth as f64 > queue_capacity as f64 * high_water;
    if error_agents > 0 || backlog {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Periodic health checker
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    tasks: Arc<TaskBoard>,
    router: MessageRouter,
    correlator: ResponseCorrelator,
    events: EventBus,
    store: Arc<dyn PersistentStore>,
    config: HealthConfig,
    last: RwLock<Option<HealthStatus>>,
}

impl HealthMonitor {
    /// Create a monitor
    #[must_use]
    pub fn new(
        config: HealthConfig,
        registry: Arc<AgentRegistry>,
        tasks: Arc<TaskBoard>,
        router: MessageRouter,
        correlator: ResponseCorrelator,
        events: EventBus,
        store: Arc<dyn PersistentStore>,
    ) -> Self {
        Self {
            registry,
            tasks,
            router,
            correlator,
            events,
            store,
            config,
            last: RwLock::new(None),
        }
    }

    /// Compute a fresh snapshot.
    pub async fn check(&self) -> SystemHealth {
        let agent_status = self.registry.status_counts().await;
        let total_agents = agent_status.values().sum();
        let task_status = self.tasks.status_counts().await;
        let message_queue_depth = self.router.queue_depth();
        let message_queue_capacity = self.router.queue_capacity();
        let error_agents = agent_status.get(&AgentStatus::Error).copied().unwrap_or(0);

        SystemHealth {
            status: classify(
                total_agents,
                error_agents,
                message_queue_depth,
                message_queue_capacity,
                self.config.queue_high_water,
            ),
            total_agents,
            agent_status,
            task_status,
            message_queue_depth,
            message_queue_capacity,
            event_queue_depth: self.events.queue_depth(),
            dropped_events: self.events.dropped_count(),
            pending_replies: self.correlator.pending_count(),
            orphaned_replies: self.correlator.orphan_count(),
            checked_at: Utc::now(),
        }
    }

    /// Status reported by the last [`tick`](Self::tick), if any
    pub async fn last_status(&self) -> Option<HealthStatus> {
        *self.last.read().await
    }

    /// Run one monitoring round: check, persist, report transitions and
    /// sweep stale replies.
    pub async fn tick(&self) -> SystemHealth {
        let health = self.check().await;
        self.persist(&health).await;

        let previous = self.last.write().await.replace(health.status);
        let previous = previous.unwrap_or_default();
        if previous != health.status {
            if health.status != HealthStatus::Healthy {
                warn!(
                    previous = %previous,
                    current = %health.status,
                    agents = health.total_agents,
                    error_agents = health.error_agents(),
                    queue_depth = health.message_queue_depth,
                    "System health changed"
                );
            } else {
                debug!(previous = %previous, "System health recovered");
            }
            self.events.emit(Event::new(
                SOURCE,
                EventKind::HealthChanged {
                    previous,
                    current: health.status,
                },
            ));
        }

        let swept = self.correlator.sweep();
        debug!(
            status = %health.status,
            orphans_swept = swept.orphans,
            handlers_swept = swept.handlers,
            "Health check complete"
        );
        health
    }

    async fn persist(&self, health: &SystemHealth) {
        let key = format!(
            "health:{}",
            health.checked_at.format("%Y%m%dT%H%M%S%.6fZ")
        );
        let value = match serde_json::to_value(health) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize health snapshot");
                return;
            }
        };
        if let Err(e) = self
            .store
            .put(&key, value, Some(self.config.snapshot_ttl()))
            .await
        {
            warn!(error = %e, "Failed to persist health snapshot");
        }
    }

    /// Tick on the configured interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval_secs = self.config.interval_secs, "Health monitor started");
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests;
