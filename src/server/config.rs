//! Server configuration types

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use switchyard_core::{
    CorrelatorConfig, EventBusConfig, FabricConfig, HealthConfig, RegistryConfig, RouterConfig,
};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub events: EventBusConfig,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

impl AppConfig {
    /// Fabric settings, validated
    pub fn fabric(&self) -> Result<FabricConfig> {
        let fabric = FabricConfig {
            router: self.router.clone(),
            events: self.events.clone(),
            correlator: self.correlator.clone(),
            health: self.health.clone(),
            registry: self.registry.clone(),
        };
        fabric.validate().context("Invalid fabric configuration")?;
        Ok(fabric)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Audit store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often expired audit records are reclaimed
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

/// Built-in agents registered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Simulated work time of the research agent
    #[serde(default = "default_research_delay_ms")]
    pub research_delay_ms: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            research_delay_ms: default_research_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_research_delay_ms() -> u64 {
    250
}
