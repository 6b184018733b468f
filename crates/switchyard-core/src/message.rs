//! Messages exchanged between agents and callers.
//!
//! A message may address several recipients. Each recipient delivery is
//! independent: the router never lets one failure affect another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::agent::AgentId;

/// Context key under which the caller's correlation key travels
pub const CORRELATION_KEY: &str = "correlation_key";

/// Context key under which a dispatched task travels
pub const TASK_KEY: &str = "task";

/// Context flag marking a reply as interim
pub const INTERIM_FLAG: &str = "interim";

/// Kind of message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A request for work or information
    Request,
    /// An answer to a request
    Response,
    /// An instruction, e.g. a task dispatch
    Command,
    /// A notification
    Event,
    /// An acknowledgement that work is in progress
    Ack,
    /// Sent to every registered agent
    Broadcast,
}

/// Message priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background
    Low,
    /// Default
    Normal,
    /// Ahead of normal traffic
    High,
    /// Urgent
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A routed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (assigned by the router when nil)
    pub id: Uuid,
    /// Sender
    pub from: AgentId,
    /// Recipients: agent IDs or correlation keys
    pub to: Vec<AgentId>,
    /// Message kind
    pub message_type: MessageType,
    /// Payload
    pub content: String,
    /// Free-form context
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Address replies should be sent to
    pub reply_to: Option<AgentId>,
    /// Creation time (assigned by the router when unset)
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the sender expects an acknowledgement
    #[serde(default)]
    pub requires_ack: bool,
}

impl Message {
    /// Create a message with a nil ID; the router assigns the real one.
    pub fn new(
        from: impl Into<AgentId>,
        to: Vec<AgentId>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            from: from.into(),
            to,
            message_type,
            content: content.into(),
            context: HashMap::new(),
            priority: Priority::Normal,
            reply_to: None,
            timestamp: None,
            requires_ack: false,
        }
    }

    /// Request addressed to a single recipient.
    pub fn request(
        from: impl Into<AgentId>,
        to: impl Into<AgentId>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(from, vec![to.into()], MessageType::Request, content)
    }

    /// Build a reply to `self`, addressed to its `reply_to` (or sender).
    pub fn reply(&self, from: impl Into<AgentId>, content: impl Into<String>) -> Self {
        let target = self.reply_to.clone().unwrap_or_else(|| self.from.clone());
        let mut reply = Self::new(from, vec![target], MessageType::Response, content);
        if let Some(key) = self.context.get(CORRELATION_KEY) {
            reply.context.insert(CORRELATION_KEY.to_string(), key.clone());
        }
        reply
    }

    /// Build an interim acknowledgement to `self`.
    pub fn ack(&self, from: impl Into<AgentId>, content: impl Into<String>) -> Self {
        let mut ack = self.reply(from, content);
        ack.message_type = MessageType::Ack;
        ack
    }

    /// Add a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the reply address.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<AgentId>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Correlation key carried in the context, if any.
    #[must_use]
    pub fn correlation_key(&self) -> Option<&str> {
        self.context.get(CORRELATION_KEY).and_then(|v| v.as_str())
    }

    /// Fill router-owned defaults.
    pub(crate) fn fill_defaults(&mut self) {
        if self.id.is_nil() {
            self.id = Uuid::new_v4();
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
    }

    /// Content truncated for logs.
    #[must_use]
    pub fn preview(&self) -> String {
        preview(&self.content, 120)
    }
}

/// Char-boundary-safe truncation.
pub(crate) fn preview(content: &str, max: usize) -> String {
    if content.len() <= max {
        return content.to_string();
    }
    let end = content
        .char_indices()
        .take_while(|(i, _)| *i < max)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    format!("{}...", &content[..end])
}
