//! Error types for switchyard-core
//!
//! This module provides the fabric's error taxonomy and user-friendly formatting.

use thiserror::Error;
use uuid::Uuid;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// An agent with the same ID is already registered
    #[error("agent already registered: {0}")]
    AlreadyRegistered(String),

    /// Agent lookup failed
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// Task lookup failed
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// No reply handler registered for a correlation key
    #[error("no reply handler for key: {0}")]
    HandlerNotFound(String),

    /// The bounded message queue is full (backpressure)
    #[error("message queue full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// The message cannot be routed as given
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The queue consumer has shut down
    #[error("message queue closed")]
    Closed,

    /// No registered agent can handle the task type
    #[error("no suitable agent for task type '{task_type}'")]
    NoSuitableAgent {
        /// Requested task type
        task_type: String,
    },

    /// A single recipient delivery failed
    #[error("delivery to '{recipient}' failed: {reason}")]
    DeliveryFailed {
        /// Recipient agent ID
        recipient: String,
        /// Failure description
        reason: String,
    },

    /// An operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Agent refused or failed to stop gracefully
    #[error("agent '{agent_id}' failed to stop: {reason}")]
    StopFailed {
        /// Agent ID
        agent_id: String,
        /// Failure description
        reason: String,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Error raised by an agent implementation
    #[error("agent error: {0}")]
    Agent(String),

    /// Persistent store error
    #[error("store error: {0}")]
    Store(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error is transient and the caller may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::QueueFull { .. } | Error::Timeout(_) | Error::DeliveryFailed { .. }
        )
    }
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::AlreadyRegistered(id) => format!("Agent '{}' is already registered.", id),
            Error::AgentNotFound(id) => format!("Agent '{}' is not registered.", id),
            Error::TaskNotFound(id) => format!("Task {} does not exist.", id),
            Error::HandlerNotFound(key) => format!("Nobody is waiting on '{}'.", key),
            Error::QueueFull { capacity } => {
                format!("The system is busy ({} messages queued).", capacity)
            }
            Error::InvalidMessage(msg) => format!("The message cannot be sent: {}", msg),
            Error::Closed => "The message router has shut down.".to_string(),
            Error::NoSuitableAgent { task_type } => {
                format!("No agent can handle '{}' tasks right now.", task_type)
            }
            Error::DeliveryFailed { recipient, .. } => {
                format!("Could not deliver the message to '{}'.", recipient)
            }
            Error::Timeout(what) => format!("Timed out: {}", what),
            Error::StopFailed { agent_id, reason } => {
                format!("Agent '{}' did not stop cleanly: {}", agent_id, reason)
            }
            Error::Cancelled => "The request was cancelled.".to_string(),
            Error::Agent(msg) => format!("Agent error: {}", msg),
            Error::Store(msg) => format!("Storage error: {}", msg),
            Error::Serialization(e) => format!("Malformed data: {}", e),
            Error::Configuration(msg) => format!("Configuration error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::QueueFull { .. } => Some("Retry in a moment.".to_string()),
            Error::NoSuitableAgent { .. } => {
                Some("Register an agent that declares this capability.".to_string())
            }
            Error::StopFailed { .. } => {
                Some("The agent is still registered; retry the unregistration.".to_string())
            }
            Error::Configuration(_) => {
                Some("Check config/default.toml and SWITCHYARD_* variables.".to_string())
            }
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();
    if let Some(suggestion) = error.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }
    output
}

#[cfg(test)]
mod tests;
