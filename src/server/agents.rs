//! Built-in agents
//!
//! Two small agents so a fresh install has something to talk to:
//! - `echo` answers immediately with the request text
//! - `researcher` acknowledges first, then answers after a short delay

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    Agent, AgentState, AgentStatus, Coordinator, Message, MessageRouter, StateCell,
};
use tracing::{debug, info};

use super::config::AgentsConfig;

#[derive(Default)]
pub struct EchoAgent {
    state: StateCell,
}

#[async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> &str {
        "echo"
    }

    fn agent_type(&self) -> &str {
        "utility"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }

    fn state(&self) -> AgentState {
        self.state.get()
    }

    async fn stop(&self) -> switchyard_core::Result<()> {
        self.state.set_status(AgentStatus::Stopped);
        Ok(())
    }

    async fn handle_message(&self, message: Message) -> switchyard_core::Result<Option<Message>> {
        self.state.update(|s| s.current_task = None);
        Ok(Some(message.reply(self.id(), message.content.clone())))
    }
}

pub struct ResearchAgent {
    router: MessageRouter,
    delay: Duration,
    state: StateCell,
}

impl ResearchAgent {
    pub fn new(router: MessageRouter, delay: Duration) -> Self {
        Self {
            router,
            delay,
            state: StateCell::new(AgentState::idle()),
        }
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn id(&self) -> &str {
        "researcher"
    }

    fn agent_type(&self) -> &str {
        "research"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["research".to_string(), "summarize".to_string()]
    }

    fn state(&self) -> AgentState {
        self.state.get()
    }

    async fn stop(&self) -> switchyard_core::Result<()> {
        self.state.set_status(AgentStatus::Stopped);
        Ok(())
    }

    async fn handle_message(&self, message: Message) -> switchyard_core::Result<Option<Message>> {
        self.state.update(|s| {
            s.status = AgentStatus::Busy;
            s.workload = s.workload.saturating_add(25);
        });
        self.router
            .route(message.ack(self.id(), "Acknowledged, looking into it."))
            .await?;

        tokio::time::sleep(self.delay).await;
        debug!(message_id = %message.id, "Research finished");

        self.state.update(|s| {
            s.workload = s.workload.saturating_sub(25);
            if s.workload == 0 {
                s.status = AgentStatus::Idle;
            }
        });
        let answer = format!(
            "Summary for \"{}\": nothing conclusive yet, but the question is well-formed.",
            message.preview()
        );
        Ok(Some(message.reply(self.id(), answer)))
    }
}

/// Register the built-in agents when enabled.
pub async fn register_builtin_agents(
    coordinator: &Coordinator,
    config: &AgentsConfig,
) -> Result<()> {
    if !config.enabled {
        info!("Built-in agents disabled by configuration");
        return Ok(());
    }

    coordinator.register_agent(Arc::new(EchoAgent::default())).await?;
    coordinator
        .register_agent(Arc::new(ResearchAgent::new(
            coordinator.router().clone(),
            Duration::from_millis(config.research_delay_ms),
        )))
        .await?;
    info!(agents = coordinator.registry().len().await, "Built-in agents registered");
    Ok(())
}
