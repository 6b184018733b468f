//! Task Assigner
//!
//! Picks the least-loaded capable agent for a task and dispatches it as a
//! `Command` message. Ties on workload go to the lexicographically smallest
//! agent ID so assignment is deterministic.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::AgentId;
use crate::error::{Error, Result};
use crate::event_bus::{Event, EventBus, EventKind};
use crate::message::{Message, MessageType, TASK_KEY};
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;
use crate::task::{Task, TaskBoard, TaskStatus};

const SOURCE: &str = "assigner";

/// Assigns tasks to agents and records them on the task board.
pub struct TaskAssigner {
    registry: Arc<AgentRegistry>,
    router: MessageRouter,
    tasks: Arc<TaskBoard>,
    events: EventBus,
}

impl TaskAssigner {
    /// Create an assigner
    #[must_use]
    pub fn new(
        registry: Arc<AgentRegistry>,
        router: MessageRouter,
        tasks: Arc<TaskBoard>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            router,
            tasks,
            events,
        }
    }

    /// Assign `task` to the best available agent.
    ///
    /// Returns the chosen agent's ID. When no agent qualifies nothing is
    /// stored. When the dispatch message cannot be routed the stored task
    /// is marked `Failed` and the routing error is returned.
    pub async fn assign_task(&self, mut task: Task) -> Result<AgentId> {
        task.fill_defaults();

        let Some(agent_id) = self.select_agent(&task.task_type).await else {
            warn!(task_id = %task.id, task_type = %task.task_type, "No suitable agent for task");
            return Err(Error::NoSuitableAgent {
                task_type: task.task_type,
            });
        };

        task.assignee = Some(agent_id.clone());
        task.status = TaskStatus::Assigned;
        let task_id = task.id;
        let task_type = task.task_type.clone();
        let payload = serde_json::to_value(&task)?;
        let command = Message::new(
            task.requester.clone(),
            vec![agent_id.clone()],
            MessageType::Command,
            task.description.clone(),
        )
        .with_priority(task.priority)
        .with_context(TASK_KEY, payload);

        self.tasks.insert(task).await;
        info!(task_id = %task_id, task_type = %task_type, agent_id = %agent_id, "Task assigned");
        self.events.emit(Event::new(
            SOURCE,
            EventKind::TaskAssigned {
                task_id,
                agent_id: agent_id.clone(),
                task_type,
            },
        ));

        if let Err(e) = self.router.route(command).await {
            warn!(task_id = %task_id, agent_id = %agent_id, error = %e, "Failed to dispatch task");
            let error = e.to_string();
            self.tasks
                .transition(task_id, |t| {
                    t.status = TaskStatus::Failed;
                    t.error = Some(error);
                })
                .await;
            return Err(e);
        }

        Ok(agent_id)
    }

    async fn select_agent(&self, task_type: &str) -> Option<AgentId> {
        let agents = self.registry.list().await;
        let best = agents
            .iter()
            .filter_map(|agent| {
                let state = agent.state();
                (state.status.accepts_tasks() && agent.can_handle(task_type))
                    .then(|| (state.workload, agent.id()))
            })
            .min()?;
        debug!(agent_id = best.1, workload = best.0, candidates = agents.len(), "Selected agent");
        Some(best.1.to_string())
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        self.tasks.get(id).await.ok_or(Error::TaskNotFound(id))
    }

    /// All tasks, newest first
    pub async fn list_tasks(&self) -> Vec<Task> {
        self.tasks.list().await
    }

    /// Report that the assignee started the task.
    pub fn report_started(&self, task_id: Uuid) {
        self.events
            .emit(Event::new(SOURCE, EventKind::TaskStarted { task_id }));
    }

    /// Report successful completion.
    pub fn report_completed(&self, task_id: Uuid, output: Option<serde_json::Value>) {
        self.events.emit(Event::new(
            SOURCE,
            EventKind::TaskCompleted { task_id, output },
        ));
    }

    /// Report failure.
    pub fn report_failed(&self, task_id: Uuid, error: impl Into<String>) {
        self.events.emit(Event::new(
            SOURCE,
            EventKind::TaskFailed {
                task_id,
                error: error.into(),
            },
        ));
    }

    /// Report that the task was abandoned.
    pub fn report_cancelled(&self, task_id: Uuid, reason: Option<String>) {
        self.events.emit(Event::new(
            SOURCE,
            EventKind::TaskCancelled { task_id, reason },
        ));
    }
}

#[cfg(test)]
mod tests;
