//! Scripted agent for tests and local experiments.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agent::{Agent, AgentState, AgentStatus, StateCell};
use crate::error::{Error, Result};
use crate::message::Message;

type Responder = Arc<dyn Fn(&Message) -> Result<Option<Message>> + Send + Sync>;

/// An agent whose replies come from a closure and which records every
/// message it receives.
pub struct ScriptedAgent {
    id: String,
    agent_type: String,
    capabilities: Vec<String>,
    state: StateCell,
    responder: Option<Responder>,
    received: Mutex<Vec<Message>>,
    reply_delay: Option<Duration>,
    stop_delay: Option<Duration>,
    fail_stop: bool,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ScriptedAgent {
    /// Create a silent, idle agent.
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            capabilities: Vec::new(),
            state: StateCell::new(AgentState::idle()),
            responder: None,
            received: Mutex::new(Vec::new()),
            reply_delay: None,
            stop_delay: None,
            fail_stop: false,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Declare capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Set the initial workload.
    #[must_use]
    pub fn with_workload(self, workload: u8) -> Self {
        self.state.update(|s| s.workload = workload);
        self
    }

    /// Set the initial status.
    #[must_use]
    pub fn with_status(self, status: AgentStatus) -> Self {
        self.state.set_status(status);
        self
    }

    /// Reply to every message using `f`.
    #[must_use]
    pub fn replying_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(f));
        self
    }

    /// Reply to every message with `content`.
    #[must_use]
    pub fn replying(self, content: impl Into<String>) -> Self {
        let content = content.into();
        let id = self.id.clone();
        self.replying_with(move |msg| Ok(Some(msg.reply(id.clone(), content.clone()))))
    }

    /// Fail every delivery.
    #[must_use]
    pub fn failing(self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.replying_with(move |_| Err(Error::Agent(reason.clone())))
    }

    /// Sleep before replying.
    #[must_use]
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    /// Sleep inside `stop`.
    #[must_use]
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    /// Make `stop` fail.
    #[must_use]
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Change the reported status.
    pub fn set_status(&self, status: AgentStatus) {
        self.state.set_status(status);
    }

    /// Change the reported workload.
    pub fn set_workload(&self, workload: u8) {
        self.state.update(|s| s.workload = workload);
    }

    /// Messages received so far.
    pub fn received(&self) -> Vec<Message> {
        match self.received.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of messages received so far.
    pub fn received_count(&self) -> usize {
        self.received().len()
    }

    /// Wait until at least `count` messages arrived. Returns `false` on timeout.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.received_count() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Whether `start` was called.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether `stop` completed.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        &self.agent_type
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn state(&self) -> AgentState {
        self.state.get()
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_stop {
            return Err(Error::Agent(format!("{} refused to stop", self.id)));
        }
        self.stopped.store(true, Ordering::SeqCst);
        self.state.set_status(AgentStatus::Stopped);
        Ok(())
    }

    async fn handle_message(&self, message: Message) -> Result<Option<Message>> {
        match self.received.lock() {
            Ok(mut guard) => guard.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        if let Some(delay) = self.reply_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.responder {
            Some(responder) => responder(&message),
            None => Ok(None),
        }
    }
}
