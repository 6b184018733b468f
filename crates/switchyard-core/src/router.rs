//! Message Router
//!
//! `route` persists a message for audit and enqueues it without blocking;
//! a full queue is the system's backpressure signal. A single [`Dispatcher`]
//! drains the queue and fans each message out to its recipients:
//!
//! - correlation keys go to the [`ResponseCorrelator`]
//! - agent IDs are looked up in the [`AgentRegistry`] and delivered on a
//!   bounded pool of tracked tasks
//!
//! Every recipient is isolated: an unknown recipient or a failing agent is
//! logged and skipped.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentId};
use crate::config::RouterConfig;
use crate::correlator::ResponseCorrelator;
use crate::error::{Error, Result};
use crate::event_bus::{Event, EventBus, EventKind};
use crate::message::{Message, CORRELATION_KEY};
use crate::registry::AgentRegistry;
use crate::store::PersistentStore;

const SOURCE: &str = "router";

struct RouterInner {
    sender: mpsc::Sender<Message>,
    registry: Arc<AgentRegistry>,
    correlator: ResponseCorrelator,
    events: EventBus,
    store: Arc<dyn PersistentStore>,
    config: RouterConfig,
}

/// Producer handle for the message queue. Cheap to clone; agents may hold
/// one to publish messages of their own.
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("queue_depth", &self.queue_depth())
            .field("queue_capacity", &self.queue_capacity())
            .finish()
    }
}

impl MessageRouter {
    /// Create the router and the dispatcher that drains it.
    #[must_use]
    pub fn new(
        config: RouterConfig,
        registry: Arc<AgentRegistry>,
        correlator: ResponseCorrelator,
        events: EventBus,
        store: Arc<dyn PersistentStore>,
    ) -> (Self, Dispatcher) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_deliveries));
        let router = Self {
            inner: Arc::new(RouterInner {
                sender,
                registry,
                correlator,
                events,
                store,
                config,
            }),
        };
        let dispatcher = Dispatcher {
            receiver,
            router: router.clone(),
            permits,
            tracker: TaskTracker::new(),
        };
        (router, dispatcher)
    }

    /// Enqueue a message for delivery.
    ///
    /// Assigns `id`/`timestamp` when unset and returns the message ID. Never
    /// waits for queue space: a full queue fails with `QueueFull`.
    pub async fn route(&self, mut message: Message) -> Result<Uuid> {
        if message.to.is_empty() {
            return Err(Error::InvalidMessage("message has no recipients".to_string()));
        }
        message.fill_defaults();
        let message_id = message.id;
        let from = message.from.clone();
        let recipients = message.to.clone();

        self.persist(&message).await;

        match self.inner.sender.try_send(message) {
            Ok(()) => {
                debug!(%message_id, from = %from, ?recipients, "Message enqueued");
                self.inner.events.emit(Event::new(
                    SOURCE,
                    EventKind::MessageSent {
                        message_id,
                        from,
                        recipients,
                    },
                ));
                Ok(message_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%message_id, capacity = self.queue_capacity(), "Message queue full");
                Err(Error::QueueFull {
                    capacity: self.queue_capacity(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::Closed),
        }
    }

    /// Send `message` to every agent registered right now.
    pub async fn broadcast(&self, mut message: Message) -> Result<Uuid> {
        message.to = self.inner.registry.ids().await;
        self.route(message).await
    }

    /// Messages waiting for the dispatcher
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner.sender.max_capacity() - self.inner.sender.capacity()
    }

    /// Queue capacity
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.inner.sender.max_capacity()
    }

    /// Whether the dispatcher has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.sender.is_closed()
    }

    async fn persist(&self, message: &Message) {
        let key = format!("message:{}", message.id);
        let value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Failed to serialize message");
                return;
            }
        };
        if let Err(e) = self
            .inner
            .store
            .put(&key, value, Some(self.inner.config.message_ttl()))
            .await
        {
            warn!(message_id = %message.id, error = %e, "Failed to persist message");
        }
    }

    /// Deliver to one agent, then route any reply it returns.
    async fn deliver(
        &self,
        agent: Arc<dyn Agent>,
        recipient: AgentId,
        message: Message,
        cancel: CancellationToken,
    ) {
        let message_id = message.id;
        let timeout = self.inner.config.delivery_timeout();

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, agent.handle_message(message.clone())) => result,
            _ = cancel.cancelled() => {
                debug!(%message_id, recipient = %recipient, "Delivery cancelled");
                return;
            }
        };

        let reason = match result {
            Ok(Ok(reply)) => {
                debug!(%message_id, recipient = %recipient, "Message delivered");
                self.inner.events.emit(Event::new(
                    SOURCE,
                    EventKind::MessageDelivered {
                        message_id,
                        recipient: recipient.clone(),
                    },
                ));
                if let Some(reply) = reply {
                    self.route_reply(&message, &recipient, reply).await;
                }
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no response within {:?}", timeout),
        };

        let error = Error::DeliveryFailed {
            recipient: recipient.clone(),
            reason: reason.clone(),
        };
        warn!(%message_id, error = %error, "Delivery failed");
        self.inner.events.emit(Event::new(
            SOURCE,
            EventKind::DeliveryFailed {
                message_id,
                recipient,
                error: reason,
            },
        ));
    }

    async fn route_reply(&self, original: &Message, responder: &str, mut reply: Message) {
        if reply.to.is_empty() {
            reply.to = vec![original
                .reply_to
                .clone()
                .unwrap_or_else(|| original.from.clone())];
        }
        if reply.from.is_empty() {
            reply.from = responder.to_string();
        }
        if let Some(key) = original.context.get(CORRELATION_KEY) {
            reply
                .context
                .entry(CORRELATION_KEY.to_string())
                .or_insert_with(|| key.clone());
        }

        if let Err(e) = self.route(reply).await {
            warn!(
                original_id = %original.id,
                responder,
                error = %e,
                "Failed to route reply"
            );
        }
    }
}

/// A resolved agent delivery waiting for a worker.
type Delivery = (Arc<dyn Agent>, AgentId, Message);

/// Single consumer of the message queue.
///
/// While agent deliveries wait for a worker the dispatcher reads at most one
/// message ahead, so replies bound for the correlator keep flowing when every
/// worker is busy. The lookahead is parked until the current message has
/// been handed out, which keeps the queue bounded and per-agent order intact.
pub struct Dispatcher {
    receiver: mpsc::Receiver<Message>,
    router: MessageRouter,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Drain the queue until cancelled, then wait for in-flight deliveries.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            capacity = self.router.queue_capacity(),
            workers = self.permits.available_permits(),
            "Message dispatcher started"
        );
        let mut ready: VecDeque<Delivery> = VecDeque::new();
        let mut parked: VecDeque<Delivery> = VecDeque::new();
        let mut open = true;

        loop {
            if ready.is_empty() {
                std::mem::swap(&mut ready, &mut parked);
            }

            if ready.is_empty() {
                if !open {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    message = self.receiver.recv() => match message {
                        Some(message) => ready = self.resolve(message).await,
                        None => break,
                    },
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    if let Some(delivery) = ready.pop_front() {
                        self.spawn_delivery(permit, delivery, &cancel);
                    }
                }
                message = self.receiver.recv(), if open && parked.is_empty() => match message {
                    Some(message) => parked = self.resolve(message).await,
                    None => open = false,
                },
            }
        }

        self.receiver.close();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Message dispatcher stopped");
    }

    /// Hand correlation-key recipients to the correlator and look the rest
    /// up in the registry. Returns the agent deliveries still to be made.
    async fn resolve(&self, message: Message) -> VecDeque<Delivery> {
        let inner = &self.router.inner;
        let mut deliveries = VecDeque::new();
        for recipient in &message.to {
            if inner.correlator.accepts(recipient) {
                let outcome = inner.correlator.deliver(recipient, &message);
                debug!(message_id = %message.id, key = %recipient, ?outcome, "Reply handed to correlator");
                continue;
            }

            let Some(agent) = inner.registry.get(recipient).await else {
                warn!(message_id = %message.id, recipient = %recipient, "Recipient not registered, skipping");
                inner.events.emit(Event::new(
                    SOURCE,
                    EventKind::DeliveryFailed {
                        message_id: message.id,
                        recipient: recipient.clone(),
                        error: "recipient not registered".to_string(),
                    },
                ));
                continue;
            };
            deliveries.push_back((agent, recipient.clone(), message.clone()));
        }
        deliveries
    }

    fn spawn_delivery(
        &self,
        permit: OwnedSemaphorePermit,
        (agent, recipient, message): Delivery,
        cancel: &CancellationToken,
    ) {
        let router = self.router.clone();
        let cancel = cancel.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            router.deliver(agent, recipient, message, cancel).await;
        });
    }
}

#[cfg(test)]
mod tests;
