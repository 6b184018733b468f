//! Agent contract
//!
//! Agents are external collaborators. The fabric only needs their identity,
//! declared capabilities, live state, a graceful start/stop pair and a
//! message-intake operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::message::Message;

/// Agent identifier
pub type AgentId = String;

/// Agent kind, used as a secondary registry index
pub type AgentType = String;

/// Live status reported by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Ready for work
    Idle,
    /// Working but still accepting tasks
    Busy,
    /// Not reachable
    Offline,
    /// Faulted
    Error,
    /// Stopped gracefully
    Stopped,
}

impl AgentStatus {
    /// Whether tasks may be assigned to an agent in this status.
    #[must_use]
    pub fn accepts_tasks(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of an agent's mutable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Current status
    pub status: AgentStatus,
    /// Task currently being worked on
    pub current_task: Option<Uuid>,
    /// Business proxy, 0 (free) to 100 (saturated)
    pub workload: u8,
    /// Last time the agent did anything
    pub last_activity: DateTime<Utc>,
}

/// Upper bound for [`AgentState::workload`]
pub const MAX_WORKLOAD: u8 = 100;

impl AgentState {
    /// Idle state with zero workload.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            status: AgentStatus::Idle,
            current_task: None,
            workload: 0,
            last_activity: Utc::now(),
        }
    }

    /// Set the workload, clamped to [`MAX_WORKLOAD`].
    #[must_use]
    pub fn with_workload(mut self, workload: u8) -> Self {
        self.workload = workload.min(MAX_WORKLOAD);
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::idle()
    }
}

/// An agent participating in the fabric.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique identifier
    fn id(&self) -> &str;

    /// Agent kind
    fn agent_type(&self) -> &str;

    /// Task types this agent can handle
    fn capabilities(&self) -> Vec<String>;

    /// Current state snapshot
    fn state(&self) -> AgentState;

    /// Whether `task_type` is in the declared capability set.
    fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities().iter().any(|c| c == task_type)
    }

    /// Start the agent. Called before registration.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stop the agent gracefully
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Accept a message; may return a reply to be routed back.
    async fn handle_message(&self, message: Message) -> Result<Option<Message>>;
}

/// Interior-mutable [`AgentState`] holder for agent implementations.
#[derive(Debug, Default)]
pub struct StateCell {
    inner: RwLock<AgentState>,
}

impl StateCell {
    /// Create a cell holding `state`.
    #[must_use]
    pub fn new(state: AgentState) -> Self {
        Self {
            inner: RwLock::new(state),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> AgentState {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Mutate the state in place and bump `last_activity`.
    pub fn update(&self, f: impl FnOnce(&mut AgentState)) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
        guard.workload = guard.workload.min(MAX_WORKLOAD);
        guard.last_activity = Utc::now();
    }

    /// Replace the status.
    pub fn set_status(&self, status: AgentStatus) {
        self.update(|s| s.status = status);
    }
}

#[cfg(test)]
mod tests;
