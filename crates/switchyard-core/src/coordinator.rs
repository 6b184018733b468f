//! Coordinator
//!
//! Wires the registry, assigner, router, event bus, correlator and health
//! monitor together and owns their background loops.
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = Coordinator::start(FabricConfig::default(), Arc::new(MemoryStore::new()))?;
//! coordinator.register_agent(Arc::new(my_agent)).await?;
//!
//! let answer = coordinator
//!     .submit("conv-1", Message::request("user", "planner", "plan my week"))
//!     .await?;
//!
//! coordinator.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentId};
use crate::assigner::TaskAssigner;
use crate::config::FabricConfig;
use crate::correlator::{ResponseCorrelator, WaitOutcome};
use crate::error::{Error, Result};
use crate::event_bus::{Event, EventBus};
use crate::health::{HealthMonitor, SystemHealth};
use crate::message::{Message, CORRELATION_KEY};
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;
use crate::store::PersistentStore;
use crate::task::{Task, TaskBoard};

/// Running coordination fabric
pub struct Coordinator {
    config: FabricConfig,
    registry: Arc<AgentRegistry>,
    assigner: TaskAssigner,
    router: MessageRouter,
    correlator: ResponseCorrelator,
    events: EventBus,
    monitor: Arc<HealthMonitor>,
    store: Arc<dyn PersistentStore>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_initiated: AtomicBool,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator").finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Build every component and spawn the dispatcher, event processor and
    /// health loop.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: FabricConfig, store: Arc<dyn PersistentStore>) -> Result<Arc<Self>> {
        config.validate()?;

        let tasks = Arc::new(TaskBoard::new());
        let (events, processor) = EventBus::new(&config.events, store.clone(), tasks.clone());
        let registry = Arc::new(AgentRegistry::new(
            events.clone(),
            config.registry.stop_timeout(),
        ));
        let correlator = ResponseCorrelator::new(config.correlator.clone())?;
        let (router, dispatcher) = MessageRouter::new(
            config.router.clone(),
            registry.clone(),
            correlator.clone(),
            events.clone(),
            store.clone(),
        );
        let assigner = TaskAssigner::new(
            registry.clone(),
            router.clone(),
            tasks.clone(),
            events.clone(),
        );
        let monitor = Arc::new(HealthMonitor::new(
            config.health.clone(),
            registry.clone(),
            tasks,
            router.clone(),
            correlator.clone(),
            events.clone(),
            store.clone(),
        ));

        let cancel = CancellationToken::new();
        let workers = vec![
            tokio::spawn(dispatcher.run(cancel.child_token())),
            tokio::spawn(processor.run(cancel.child_token())),
            tokio::spawn(monitor.clone().run(cancel.child_token())),
        ];

        info!(
            queue_capacity = config.router.queue_capacity,
            max_concurrent_deliveries = config.router.max_concurrent_deliveries,
            "Coordinator started"
        );

        Ok(Arc::new(Self {
            config,
            registry,
            assigner,
            router,
            correlator,
            events,
            monitor,
            store,
            cancel,
            workers: Mutex::new(workers),
            shutdown_initiated: AtomicBool::new(false),
        }))
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Agent registry
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Task assigner, including the task reporting helpers
    #[must_use]
    pub fn assigner(&self) -> &TaskAssigner {
        &self.assigner
    }

    /// Message router handle
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Response correlator
    #[must_use]
    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    /// Audit store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    /// Start `agent` and register it.
    ///
    /// An ID that is already taken is refused before `start` runs. When a
    /// concurrent registration wins the race the freshly started agent is
    /// stopped again, unless it is the very instance that got registered.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<()> {
        if self.registry.contains(agent.id()).await {
            return Err(Error::AlreadyRegistered(agent.id().to_string()));
        }
        agent.start().await?;
        if let Err(e) = self.registry.register(agent.clone()).await {
            let live = self
                .registry
                .get(agent.id())
                .await
                .is_some_and(|current| {
                    std::ptr::addr_eq(Arc::as_ptr(&current), Arc::as_ptr(&agent))
                });
            if live {
                return Err(e);
            }
            if let Err(stop_err) = agent.stop().await {
                warn!(agent_id = agent.id(), error = %stop_err, "Failed to stop rejected agent");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop and unregister an agent.
    pub async fn unregister_agent(&self, agent_id: &str) -> Result<()> {
        self.registry.unregister(agent_id).await
    }

    /// Assign a task to the best available agent.
    pub async fn assign_task(&self, task: Task) -> Result<AgentId> {
        self.assigner.assign_task(task).await
    }

    /// Route a message.
    pub async fn route(&self, message: Message) -> Result<Uuid> {
        self.router.route(message).await
    }

    /// Send a message to every registered agent.
    pub async fn broadcast(&self, message: Message) -> Result<Uuid> {
        self.router.broadcast(message).await
    }

    /// Send `message` and wait for its final reply.
    ///
    /// Waits for the configured timeout. A timed-out wait is not an error:
    /// the configured timeout text is returned instead, and the reply can
    /// still arrive later.
    pub async fn submit(&self, conversation: &str, message: Message) -> Result<String> {
        self.submit_with_timeout(
            conversation,
            message,
            self.config.correlator.wait_timeout(),
            &self.cancel.child_token(),
        )
        .await
    }

    /// [`submit`](Self::submit) with an explicit timeout and cancellation.
    pub async fn submit_with_timeout(
        &self,
        conversation: &str,
        message: Message,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match self.request(conversation, message, timeout, cancel).await {
            Err(Error::Timeout(key)) => {
                debug!(key = %key, "Returning timeout notice to caller");
                Ok(self.config.correlator.timeout_message.clone())
            }
            other => other,
        }
    }

    /// Send `message` and wait for its final reply, failing on timeout.
    ///
    /// The timeout error carries the correlation key; pass it to
    /// [`recover_reply`](Self::recover_reply) to pick up a late answer.
    pub async fn request(
        &self,
        conversation: &str,
        mut message: Message,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let key = self.correlator.new_key(conversation);
        self.correlator.register(&key);
        message.reply_to = Some(key.clone());
        message
            .context
            .insert(CORRELATION_KEY.to_string(), serde_json::json!(key));

        if let Err(e) = self.router.route(message).await {
            self.correlator.unregister(&key);
            return Err(e);
        }

        match self.correlator.wait(&key, timeout, cancel).await {
            WaitOutcome::Reply(reply) => Ok(reply),
            WaitOutcome::TimedOut => Err(Error::Timeout(key)),
            WaitOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Pick up a reply that arrived after a timed-out [`request`](Self::request).
    ///
    /// `Ok(None)` means the key is still waiting. Fails with
    /// `HandlerNotFound` when the key is neither registered nor holds an
    /// orphaned reply.
    pub fn recover_reply(&self, key: &str) -> Result<Option<String>> {
        if let Some(reply) = self.correlator.recover(key) {
            return Ok(Some(reply));
        }
        if self.correlator.is_registered(key) {
            Ok(None)
        } else {
            Err(Error::HandlerNotFound(key.to_string()))
        }
    }

    /// Current health snapshot
    pub async fn health(&self) -> SystemHealth {
        self.monitor.check().await
    }

    /// Subscribe to processed lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Stop the background loops, wait for in-flight deliveries, then stop
    /// every registered agent. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        info!("Shutting down coordinator");
        self.cancel.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Background worker ended abnormally");
            }
        }

        let stop_timeout = self.config.registry.stop_timeout();
        let agents = self.registry.list().await;
        let stops = agents.iter().map(|agent| async move {
            match tokio::time::timeout(stop_timeout, agent.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(agent_id = agent.id(), error = %e, "Agent failed to stop"),
                Err(_) => warn!(agent_id = agent.id(), "Agent stop timed out"),
            }
        });
        futures::future::join_all(stops).await;

        info!(
            dropped_events = self.events.dropped_count(),
            agents = agents.len(),
            "Coordinator stopped"
        );
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests;
