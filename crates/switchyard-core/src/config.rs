//! Fabric configuration
//!
//! Every field has a serde default so partial TOML sections deserialize.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level fabric configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Message router settings
    #[serde(default)]
    pub router: RouterConfig,
    /// Event bus settings
    #[serde(default)]
    pub events: EventBusConfig,
    /// Reply correlation settings
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    /// Health monitor settings
    #[serde(default)]
    pub health: HealthConfig,
    /// Agent registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl FabricConfig {
    /// Reject values the fabric cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.router.queue_capacity == 0 {
            return Err(Error::Configuration(
                "router.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.router.max_concurrent_deliveries == 0 {
            return Err(Error::Configuration(
                "router.max_concurrent_deliveries must be greater than 0".to_string(),
            ));
        }
        if self.events.queue_capacity == 0 || self.events.broadcast_capacity == 0 {
            return Err(Error::Configuration(
                "events capacities must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.health.queue_high_water) {
            return Err(Error::Configuration(
                "health.queue_high_water must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.correlator.key_prefix.is_empty() {
            return Err(Error::Configuration(
                "correlator.key_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Message router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Bounded message queue capacity
    #[serde(default = "default_message_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum recipient deliveries in flight
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
    /// Per-recipient delivery timeout in seconds
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Audit retention for routed messages in seconds
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,
}

impl RouterConfig {
    /// Per-recipient delivery timeout
    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    /// Audit retention for routed messages
    #[must_use]
    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_message_queue_capacity(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            message_ttl_secs: default_message_ttl_secs(),
        }
    }
}

fn default_message_queue_capacity() -> usize {
    1000
}
fn default_max_concurrent_deliveries() -> usize {
    32
}
fn default_delivery_timeout_secs() -> u64 {
    60
}
fn default_message_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Bounded event queue capacity
    #[serde(default = "default_event_queue_capacity")]
    pub queue_capacity: usize,
    /// Buffer for internal subscribers before they lag
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Event retention in seconds
    #[serde(default = "default_event_ttl_secs")]
    pub event_ttl_secs: u64,
}

impl EventBusConfig {
    /// Event retention
    #[must_use]
    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl_secs)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_event_queue_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            event_ttl_secs: default_event_ttl_secs(),
        }
    }
}

fn default_event_queue_capacity() -> usize {
    1000
}
fn default_broadcast_capacity() -> usize {
    256
}
fn default_event_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Reply correlation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Prefix that marks a recipient as a correlation key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Default wait for a final reply in seconds
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Recovery tick while waiting, in milliseconds
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
    /// Delay before a satisfied handler is removed, in milliseconds
    #[serde(default = "default_cleanup_grace_ms")]
    pub cleanup_grace_ms: u64,
    /// How long an orphaned reply is kept, in seconds
    #[serde(default = "default_orphan_ttl_secs")]
    pub orphan_ttl_secs: u64,
    /// Age after which an unsatisfied handler is swept, in seconds
    #[serde(default = "default_handler_ttl_secs")]
    pub handler_ttl_secs: u64,
    /// Text returned to the caller when the wait times out
    #[serde(default = "default_timeout_message")]
    pub timeout_message: String,
    /// Case-insensitive regexes that mark a reply as interim
    #[serde(default = "default_interim_patterns")]
    pub interim_patterns: Vec<String>,
}

impl CorrelatorConfig {
    /// Default wait for a final reply
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Recovery tick while waiting
    #[must_use]
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms.max(1))
    }

    /// Delay before a satisfied handler is removed
    #[must_use]
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    /// Orphan retention
    #[must_use]
    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    /// Handler retention after an unsatisfied wait
    #[must_use]
    pub fn handler_ttl(&self) -> Duration {
        Duration::from_secs(self.handler_ttl_secs)
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            wait_timeout_secs: default_wait_timeout_secs(),
            recovery_interval_ms: default_recovery_interval_ms(),
            cleanup_grace_ms: default_cleanup_grace_ms(),
            orphan_ttl_secs: default_orphan_ttl_secs(),
            handler_ttl_secs: default_handler_ttl_secs(),
            timeout_message: default_timeout_message(),
            interim_patterns: default_interim_patterns(),
        }
    }
}

fn default_key_prefix() -> String {
    "reply:".to_string()
}
fn default_wait_timeout_secs() -> u64 {
    120
}
fn default_recovery_interval_ms() -> u64 {
    2000
}
fn default_cleanup_grace_ms() -> u64 {
    500
}
fn default_orphan_ttl_secs() -> u64 {
    60
}
fn default_handler_ttl_secs() -> u64 {
    600
}
fn default_timeout_message() -> String {
    "The request is taking longer than expected. The answer may still arrive later.".to_string()
}

/// Phrases agents commonly use for "still working" notices.
pub fn default_interim_patterns() -> Vec<String> {
    [
        r"^\s*(ack|acknowledged)\b",
        r"\b(working on|looking into) (it|this|that|your request)\b",
        r"\bstill (working|processing|thinking)\b",
        r"\bwill get back to you\b",
        r"\bplease (wait|hold on)\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Check interval in seconds
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Snapshot retention in seconds
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
    /// Fraction of queue capacity above which the system is degraded
    #[serde(default = "default_queue_high_water")]
    pub queue_high_water: f64,
}

impl HealthConfig {
    /// Check interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Snapshot retention
    #[must_use]
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            queue_high_water: default_queue_high_water(),
        }
    }
}

fn default_health_interval_secs() -> u64 {
    30
}
fn default_snapshot_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_queue_high_water() -> f64 {
    0.8
}

/// Agent registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Bound on an agent's graceful stop, in seconds
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl RegistryConfig {
    /// Bound on an agent's graceful stop
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

fn default_stop_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests;
