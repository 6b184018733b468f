//! Configuration loading
//!
//! Switchyard layers its settings, later layers winning:
//!
//! 1. `config/default.toml` as compiled into the binary
//! 2. `config/default.toml` next to the working directory, if present
//! 3. `config/{SWITCHYARD_ENV}.toml` (`development` when unset)
//! 4. `config/local.toml` for machine-specific tweaks
//! 5. `SWITCHYARD_<SECTION>__<FIELD>` environment variables, e.g.
//!    `SWITCHYARD_ROUTER__QUEUE_CAPACITY=500`

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

const ENV_PREFIX: &str = "SWITCHYARD";
const DEFAULT_ENVIRONMENT: &str = "development";

/// Deployment environment selecting the per-environment overlay.
fn environment() -> String {
    std::env::var(format!("{ENV_PREFIX}_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
}

/// Load the layered fabric configuration.
pub fn load_config() -> Result<AppConfig> {
    let environment = environment();
    let overlays = [
        "config/default".to_string(),
        format!("config/{environment}"),
        "config/local".to_string(),
    ];

    let builder = overlays.iter().fold(
        Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml)),
        |builder, name| builder.add_source(File::with_name(name).required(false)),
    );

    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build configuration for '{environment}'"))?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
