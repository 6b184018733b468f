//! Tasks and the shared task table.
//!
//! Status moves `Pending → Assigned → InProgress → {Completed | Failed | Cancelled}`.
//! After assignment only the event processor moves a task forward; the
//! assigner may mark a task failed when its dispatch could not be routed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::AgentId;
use crate::message::Priority;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet assigned
    Pending,
    /// Assigned to an agent
    Assigned,
    /// Agent reported it started
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Abandoned
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task ID (generated when nil)
    pub id: Uuid,
    /// Capability required to run the task
    pub task_type: String,
    /// Human-readable description
    pub description: String,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Who asked for the work
    pub requester: AgentId,
    /// Agent chosen by the assigner
    pub assignee: Option<AgentId>,
    /// Lifecycle state
    pub status: TaskStatus,
    /// Input payload
    #[serde(default)]
    pub input: serde_json::Value,
    /// Output payload
    pub output: Option<serde_json::Value>,
    /// Failure description
    pub error: Option<String>,
    /// Creation time (set when unset)
    pub created_at: Option<DateTime<Utc>>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Optional deadline
    pub deadline: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task.
    pub fn new(
        task_type: impl Into<String>,
        description: impl Into<String>,
        requester: impl Into<AgentId>,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            task_type: task_type.into(),
            description: description.into(),
            priority: Priority::Normal,
            requester: requester.into(),
            assignee: None,
            status: TaskStatus::Pending,
            input: serde_json::Value::Null,
            output: None,
            error: None,
            created_at: None,
            started_at: None,
            completed_at: None,
            deadline: None,
        }
    }

    /// Set the input payload.
    #[must_use]
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set a deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub(crate) fn fill_defaults(&mut self) {
        if self.id.is_nil() {
            self.id = Uuid::new_v4();
        }
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
    }
}

/// Shared task table.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl TaskBoard {
    /// Create an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a task by ID
    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// All tasks, newest first
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Number of tasks per status
    pub async fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let tasks = self.tasks.read().await;
        let mut counts = HashMap::new();
        for task in tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the board is empty
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub(crate) async fn insert(&self, task: Task) {
        self.tasks.write().await.insert(task.id, task);
    }

    /// Apply `f` unless the task is already terminal. Returns the updated
    /// task, or `None` when it is unknown or terminal.
    pub(crate) async fn transition(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Task),
    ) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id)?;
        if task.status.is_terminal() {
            return None;
        }
        f(task);
        Some(task.clone())
    }
}
