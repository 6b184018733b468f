use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::health::HealthStatus;

/// An immutable lifecycle fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,
    /// Component or agent that emitted the event
    pub source: String,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub kind: EventKind,
}

impl Event {
    /// Create an event stamped now.
    pub fn new(source: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Audit store key, ordered by time.
    #[must_use]
    pub fn store_key(&self) -> String {
        format!(
            "event:{}:{}",
            self.timestamp.format("%Y%m%dT%H%M%S%.6fZ"),
            self.id
        )
    }

    /// Short event name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// An agent joined the registry
    AgentRegistered {
        /// Agent identifier
        agent_id: String,
        /// Agent kind
        agent_type: String,
        /// Declared capabilities
        capabilities: Vec<String>,
    },
    /// An agent left the registry
    AgentUnregistered {
        /// Agent identifier
        agent_id: String,
    },
    /// A task was assigned to an agent
    TaskAssigned {
        /// Task identifier
        task_id: Uuid,
        /// Chosen agent
        agent_id: String,
        /// Task type
        task_type: String,
    },
    /// The assignee started working
    TaskStarted {
        /// Task identifier
        task_id: Uuid,
    },
    /// The assignee finished successfully
    TaskCompleted {
        /// Task identifier
        task_id: Uuid,
        /// Task output
        output: Option<serde_json::Value>,
    },
    /// The assignee failed
    TaskFailed {
        /// Task identifier
        task_id: Uuid,
        /// Failure description
        error: String,
    },
    /// The task was abandoned
    TaskCancelled {
        /// Task identifier
        task_id: Uuid,
        /// Why it was abandoned
        reason: Option<String>,
    },
    /// A message was accepted by the router
    MessageSent {
        /// Message identifier
        message_id: Uuid,
        /// Sender
        from: String,
        /// Recipients
        recipients: Vec<String>,
    },
    /// A recipient accepted a message
    MessageDelivered {
        /// Message identifier
        message_id: Uuid,
        /// Recipient
        recipient: String,
    },
    /// A single recipient delivery failed
    DeliveryFailed {
        /// Message identifier
        message_id: Uuid,
        /// Recipient
        recipient: String,
        /// Failure description
        error: String,
    },
    /// Overall system health changed
    HealthChanged {
        /// Previous status
        previous: HealthStatus,
        /// New status
        current: HealthStatus,
    },
}

impl EventKind {
    /// Short event name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentRegistered { .. } => "agent_registered",
            Self::AgentUnregistered { .. } => "agent_unregistered",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Task the event refers to, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskAssigned { task_id, .. }
            | Self::TaskStarted { task_id }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskCancelled { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}
