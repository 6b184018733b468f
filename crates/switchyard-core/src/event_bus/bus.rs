use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{Event, EventKind};
use crate::config::EventBusConfig;
use crate::store::PersistentStore;
use crate::task::{TaskBoard, TaskStatus};

/// Producer handle for lifecycle events.
///
/// `emit` never blocks: when the queue is full the event is dropped and
/// counted. Events are telemetry, so losing some under load is accepted.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::Sender<Event>,
    broadcast: broadcast::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Create the bus and the processor that drains it.
    #[must_use]
    pub fn new(
        config: &EventBusConfig,
        store: Arc<dyn PersistentStore>,
        tasks: Arc<TaskBoard>,
    ) -> (Self, EventProcessor) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (broadcast, _) = broadcast::channel(config.broadcast_capacity);
        let bus = Self {
            sender,
            broadcast: broadcast.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let processor = EventProcessor {
            receiver,
            broadcast,
            store,
            tasks,
            ttl: config.event_ttl(),
        };
        (bus, processor)
    }

    /// Enqueue an event. Returns `false` when it was dropped.
    pub fn emit(&self, event: Event) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event = event.name(), "Event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event = event.name(), "Event processor stopped, dropping event");
                false
            }
        }
    }

    /// Subscribe to processed events.
    ///
    /// Subscribers that fall behind receive `RecvError::Lagged`.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.broadcast.receiver_count()
    }

    /// Events waiting to be processed.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Events dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Single consumer of the event queue.
pub struct EventProcessor {
    receiver: mpsc::Receiver<Event>,
    broadcast: broadcast::Sender<Event>,
    store: Arc<dyn PersistentStore>,
    tasks: Arc<TaskBoard>,
    ttl: Duration,
}

impl EventProcessor {
    /// Drain the queue until cancelled, then flush what is already queued.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Event processor started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.receiver.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => break,
                },
            }
        }

        self.receiver.close();
        while let Ok(event) = self.receiver.try_recv() {
            self.process(event).await;
        }
        info!("Event processor stopped");
    }

    /// Persist one event, apply its side effects and fan it out.
    pub async fn process(&self, event: Event) {
        match serde_json::to_value(&event) {
            Ok(value) => {
                if let Err(e) = self
                    .store
                    .put(&event.store_key(), value, Some(self.ttl))
                    .await
                {
                    warn!(event = event.name(), error = %e, "Failed to persist event");
                }
            }
            Err(e) => warn!(event = event.name(), error = %e, "Failed to serialize event"),
        }

        self.apply(&event).await;

        // No subscribers is fine.
        let _ = self.broadcast.send(event);
    }

    async fn apply(&self, event: &Event) {
        let at = event.timestamp;
        let updated = match &event.kind {
            EventKind::TaskStarted { task_id } => {
                self.tasks
                    .transition(*task_id, |t| {
                        t.status = TaskStatus::InProgress;
                        t.started_at = Some(at);
                    })
                    .await
            }
            EventKind::TaskCompleted { task_id, output } => {
                self.tasks
                    .transition(*task_id, |t| {
                        t.status = TaskStatus::Completed;
                        t.output = output.clone();
                        t.completed_at = Some(at);
                    })
                    .await
            }
            EventKind::TaskFailed { task_id, error } => {
                self.tasks
                    .transition(*task_id, |t| {
                        t.status = TaskStatus::Failed;
                        t.error = Some(error.clone());
                        t.completed_at = Some(at);
                    })
                    .await
            }
            EventKind::TaskCancelled { task_id, reason } => {
                self.tasks
                    .transition(*task_id, |t| {
                        t.status = TaskStatus::Cancelled;
                        t.error = reason.clone();
                        t.completed_at = Some(at);
                    })
                    .await
            }
            _ => return,
        };

        match updated {
            Some(task) => debug!(task_id = %task.id, status = ?task.status, "Task updated"),
            None => debug!(
                event = event.name(),
                task_id = ?event.kind.task_id(),
                "Ignoring event for unknown or finished task"
            ),
        }
    }
}
