//! Response Correlator
//!
//! Lets a caller outside the agent graph wait for exactly one final answer
//! addressed to a synthetic correlation key.
//!
//! ## Design
//!
//! - Each key owns a [`ReplySlot`] holding a reply-once `watch` channel.
//!   The first final reply is published there; later finals are dropped.
//! - Interim replies (acknowledgements) are recorded on the slot but never
//!   end the wait.
//! - A reply for a key with no slot lands in the orphan store. Waiters are
//!   woken through a broadcast signal and claim it.
//! - A waiter whose slot vanished from the table puts it back, so late
//!   replies keep reaching it.
//! - Satisfied or cancelled keys are removed after a short grace delay.
//!   Timed-out keys stay registered for late delivery until swept.

/// Interim-vs-final reply classification.
pub mod classifier;

pub use classifier::{PatternClassifier, ReplyClassifier};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CorrelatorConfig;
use crate::error::Result;
use crate::message::{preview, Message};

/// What happened to a reply handed to the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// First final reply, released to the waiter
    Delivered,
    /// Interim notice, recorded only
    Interim,
    /// A final reply was already released; dropped
    Duplicate,
    /// No handler registered; kept in the orphan store
    Orphaned,
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The final reply
    Reply(String),
    /// No final reply before the deadline
    TimedOut,
    /// The caller cancelled
    Cancelled,
}

/// Counts removed by [`ResponseCorrelator::sweep`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired orphaned replies
    pub orphans: usize,
    /// Stale handlers
    pub handlers: usize,
}

#[derive(Debug, Default)]
struct SlotState {
    delivered: bool,
    last_response: Option<String>,
    last_response_at: Option<DateTime<Utc>>,
    interim_count: usize,
}

/// Pending reply for one correlation key.
#[derive(Debug)]
pub struct ReplySlot {
    key: String,
    registered_at: DateTime<Utc>,
    created: Instant,
    state: Mutex<SlotState>,
    reply: watch::Sender<Option<String>>,
}

/// Point-in-time view of a [`ReplySlot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// Correlation key
    pub key: String,
    /// When the handler was registered
    pub registered_at: DateTime<Utc>,
    /// Whether a final reply was released
    pub delivered: bool,
    /// Most recent reply of any kind
    pub last_response: Option<String>,
    /// When the most recent reply arrived
    pub last_response_at: Option<DateTime<Utc>>,
    /// Interim replies seen so far
    pub interim_count: usize,
}

impl ReplySlot {
    fn new(key: &str) -> Self {
        let (reply, _) = watch::channel(None);
        Self {
            key: key.to_string(),
            registered_at: Utc::now(),
            created: Instant::now(),
            state: Mutex::new(SlotState::default()),
            reply,
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Correlation key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The released final reply, if any
    #[must_use]
    pub fn final_reply(&self) -> Option<String> {
        self.reply.borrow().clone()
    }

    /// Current view of the slot
    #[must_use]
    pub fn snapshot(&self) -> SlotSnapshot {
        let state = self.state();
        SlotSnapshot {
            key: self.key.clone(),
            registered_at: self.registered_at,
            delivered: state.delivered,
            last_response: state.last_response.clone(),
            last_response_at: state.last_response_at,
            interim_count: state.interim_count,
        }
    }
}

#[derive(Debug)]
struct Orphan {
    content: String,
    expires_at: Instant,
}

struct Inner {
    slots: RwLock<HashMap<String, Arc<ReplySlot>>>,
    orphans: Mutex<HashMap<String, Orphan>>,
    orphan_signal: broadcast::Sender<String>,
    classifier: Arc<dyn ReplyClassifier>,
    config: CorrelatorConfig,
}

/// Maps correlation keys to pending replies. Cheap to clone.
#[derive(Clone)]
pub struct ResponseCorrelator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCorrelator")
            .field("pending", &self.pending_count())
            .field("orphans", &self.orphan_count())
            .finish()
    }
}

impl ResponseCorrelator {
    /// Create a correlator using the configured interim patterns.
    pub fn new(config: CorrelatorConfig) -> Result<Self> {
        let classifier = PatternClassifier::new(&config.interim_patterns)?;
        Ok(Self::with_classifier(config, Arc::new(classifier)))
    }

    /// Create a correlator with a custom classifier.
    #[must_use]
    pub fn with_classifier(config: CorrelatorConfig, classifier: Arc<dyn ReplyClassifier>) -> Self {
        let (orphan_signal, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(HashMap::new()),
                orphans: Mutex::new(HashMap::new()),
                orphan_signal,
                classifier,
                config,
            }),
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &CorrelatorConfig {
        &self.inner.config
    }

    /// Generate a fresh key for a conversation.
    #[must_use]
    pub fn new_key(&self, conversation: &str) -> String {
        format!(
            "{}{}:{}",
            self.inner.config.key_prefix,
            conversation,
            Uuid::new_v4().simple()
        )
    }

    /// Whether `recipient` has the shape of a correlation key.
    #[must_use]
    pub fn is_correlation_key(&self, recipient: &str) -> bool {
        recipient.starts_with(&self.inner.config.key_prefix)
    }

    /// Whether replies to `recipient` belong to the correlator rather than
    /// the agent registry.
    #[must_use]
    pub fn accepts(&self, recipient: &str) -> bool {
        self.is_correlation_key(recipient) || self.is_registered(recipient)
    }

    /// Register interest in `key`. Idempotent: an existing slot is returned
    /// unchanged.
    pub fn register(&self, key: &str) -> Arc<ReplySlot> {
        let mut slots = self.write_slots();
        slots
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key, "Reply handler registered");
                Arc::new(ReplySlot::new(key))
            })
            .clone()
    }

    /// Remove the handler for `key`. Returns whether one existed.
    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.write_slots().remove(key).is_some();
        if removed {
            debug!(key, "Reply handler removed");
        }
        removed
    }

    /// Whether a handler is registered for `key`
    #[must_use]
    pub fn is_registered(&self, key: &str) -> bool {
        self.read_slots().contains_key(key)
    }

    /// Current view of the handler for `key`
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<SlotSnapshot> {
        self.read_slots().get(key).map(|slot| slot.snapshot())
    }

    /// Number of registered handlers
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.read_slots().len()
    }

    /// Number of orphaned replies held
    #[must_use]
    pub fn orphan_count(&self) -> usize {
        self.orphans().len()
    }

    /// Hand a reply addressed to `key` to the correlator.
    pub fn deliver(&self, key: &str, message: &Message) -> DeliveryOutcome {
        let interim = self.inner.classifier.is_interim(message);
        let slot = self.read_slots().get(key).cloned();

        let Some(slot) = slot else {
            return self.store_orphan(key, message, interim);
        };

        let mut state = slot.state();
        state.last_response = Some(message.content.clone());
        state.last_response_at = Some(Utc::now());

        if interim {
            state.interim_count += 1;
            debug!(
                key,
                interim_count = state.interim_count,
                preview = %message.preview(),
                "Interim reply recorded"
            );
            return DeliveryOutcome::Interim;
        }
        if state.delivered {
            warn!(key, preview = %message.preview(), "Duplicate final reply dropped");
            return DeliveryOutcome::Duplicate;
        }
        state.delivered = true;
        drop(state);

        slot.reply.send_replace(Some(message.content.clone()));
        info!(key, from = %message.from, "Final reply delivered");
        DeliveryOutcome::Delivered
    }

    fn store_orphan(&self, key: &str, message: &Message, interim: bool) -> DeliveryOutcome {
        if interim {
            debug!(key, "Interim reply for unknown key ignored");
            return DeliveryOutcome::Interim;
        }

        {
            let mut orphans = self.orphans();
            let now = Instant::now();
            if orphans.get(key).is_some_and(|o| o.expires_at > now) {
                warn!(key, "Duplicate orphaned reply dropped");
                return DeliveryOutcome::Duplicate;
            }
            orphans.insert(
                key.to_string(),
                Orphan {
                    content: message.content.clone(),
                    expires_at: now + self.inner.config.orphan_ttl(),
                },
            );
        }

        warn!(key, preview = %preview(&message.content, 80), "Reply without handler stored as orphan");
        // Nobody waiting is fine.
        let _ = self.inner.orphan_signal.send(key.to_string());
        DeliveryOutcome::Orphaned
    }

    /// Claim the orphaned reply for `key`.
    pub fn take_orphan(&self, key: &str) -> Option<String> {
        let orphan = self.orphans().remove(key)?;
        (orphan.expires_at > Instant::now()).then_some(orphan.content)
    }

    /// Look at the orphaned reply for `key` without claiming it.
    #[must_use]
    pub fn peek_orphan(&self, key: &str) -> Option<String> {
        self.orphans()
            .get(key)
            .filter(|o| o.expires_at > Instant::now())
            .map(|o| o.content.clone())
    }

    /// Wait for the final reply to `key`.
    ///
    /// Registers `key` if needed. On a reply or cancellation the handler is
    /// removed after the cleanup grace delay; on timeout it stays registered
    /// so a late reply can still be [`recover`](Self::recover)ed.
    pub async fn wait(&self, key: &str, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome {
        let mut slot = self.register(key);
        let mut reply_rx = slot.reply.subscribe();
        let mut orphan_rx = self.inner.orphan_signal.subscribe();

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut recovery = tokio::time::interval(self.inner.config.recovery_interval());
        recovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            if let Some(reply) = self.check(key, &mut reply_rx) {
                break WaitOutcome::Reply(reply);
            }
            if let Some(current) = self.reattach(&slot) {
                slot = current;
                reply_rx = slot.reply.subscribe();
                continue;
            }

            tokio::select! {
                _ = reply_rx.changed() => {}
                // Lagged or not, re-check the orphan store.
                _ = orphan_rx.recv() => {}
                _ = recovery.tick() => {}
                _ = &mut deadline => {
                    break match self.check(key, &mut reply_rx) {
                        Some(reply) => WaitOutcome::Reply(reply),
                        None => WaitOutcome::TimedOut,
                    };
                }
                _ = cancel.cancelled() => break WaitOutcome::Cancelled,
            }
        };

        match &outcome {
            WaitOutcome::Reply(_) => self.schedule_cleanup(slot),
            WaitOutcome::Cancelled => {
                debug!(key, "Wait cancelled");
                self.schedule_cleanup(slot);
            }
            WaitOutcome::TimedOut => warn!(
                key,
                timeout_secs = timeout.as_secs_f64(),
                "No final reply before timeout, keeping handler for late delivery"
            ),
        }
        outcome
    }

    fn check(&self, key: &str, reply_rx: &mut watch::Receiver<Option<String>>) -> Option<String> {
        if let Some(reply) = reply_rx.borrow_and_update().clone() {
            return Some(reply);
        }
        let orphan = self.take_orphan(key)?;
        info!(key, "Recovered orphaned reply");
        Some(orphan)
    }

    /// Make sure `slot` is still the registered handler for its key.
    ///
    /// Re-inserts it when it vanished. Returns the slot to follow instead
    /// when another registration replaced it.
    fn reattach(&self, slot: &Arc<ReplySlot>) -> Option<Arc<ReplySlot>> {
        if let Some(current) = self.read_slots().get(&slot.key) {
            return (!Arc::ptr_eq(current, slot)).then(|| current.clone());
        }
        let mut slots = self.write_slots();
        match slots.get(&slot.key) {
            Some(current) if !Arc::ptr_eq(current, slot) => Some(current.clone()),
            Some(_) => None,
            None => {
                warn!(key = %slot.key, "Reply handler vanished while waiting, re-registering");
                slots.insert(slot.key.clone(), slot.clone());
                None
            }
        }
    }

    /// Remove `slot` after the grace delay, unless it was replaced meanwhile.
    fn schedule_cleanup(&self, slot: Arc<ReplySlot>) {
        let this = self.clone();
        let grace = self.inner.config.cleanup_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut slots = this.write_slots();
            if slots
                .get(&slot.key)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                slots.remove(&slot.key);
                debug!(key = %slot.key, "Reply handler cleaned up");
            }
        });
    }

    /// Best-effort retrieval of a reply that arrived after a timed-out wait.
    ///
    /// Returns the released final reply or an orphan for `key` and removes
    /// the handler. Returns `None` and keeps the handler when nothing arrived
    /// yet.
    pub fn recover(&self, key: &str) -> Option<String> {
        let slot = self.read_slots().get(key).cloned();
        if let Some(reply) = slot.and_then(|s| s.final_reply()) {
            self.unregister(key);
            return Some(reply);
        }
        let orphan = self.take_orphan(key)?;
        self.unregister(key);
        Some(orphan)
    }

    /// Drop expired orphans and handlers older than the handler TTL.
    pub fn sweep(&self) -> SweepStats {
        let now = Instant::now();
        let orphans = {
            let mut orphans = self.orphans();
            let before = orphans.len();
            orphans.retain(|_, o| o.expires_at > now);
            before - orphans.len()
        };

        let ttl = self.inner.config.handler_ttl();
        let handlers = {
            let mut slots = self.write_slots();
            let before = slots.len();
            slots.retain(|_, s| now.duration_since(s.created) < ttl);
            before - slots.len()
        };

        let stats = SweepStats { orphans, handlers };
        if stats != SweepStats::default() {
            debug!(orphans, handlers, "Swept stale replies");
        }
        stats
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ReplySlot>>> {
        self.inner.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ReplySlot>>> {
        self.inner.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn orphans(&self) -> MutexGuard<'_, HashMap<String, Orphan>> {
        self.inner.orphans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
