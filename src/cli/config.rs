//! CLI configuration inspection
//!
//! Provides `switchyard config {show,get,defaults}`.

use crate::server::{load_config, DEFAULT_CONFIG};
use anyhow::{bail, Context, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Get a specific setting value
    Get {
        /// Setting key (dot notation: router.queue_capacity)
        key: String,
    },
    /// Print the built-in defaults
    Defaults,
}

pub fn run(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = load_config().context("Failed to load configuration")?;
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Get { key } => {
            let config = load_config().context("Failed to load configuration")?;
            let value = toml::Value::try_from(&config).context("Failed to serialize config")?;
            println!("{}", render(lookup(&value, &key)?));
        }
        ConfigCommands::Defaults => print!("{}", DEFAULT_CONFIG),
    }
    Ok(())
}

fn lookup<'a>(root: &'a toml::Value, key: &str) -> Result<&'a toml::Value> {
    let mut current = root;
    for part in key.split('.') {
        current = match current.get(part) {
            Some(value) => value,
            None => bail!("Unknown setting: {}", key),
        };
    }
    Ok(current)
}

fn render(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_nested_key() {
        let value: toml::Value = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(
            render(lookup(&value, "router.queue_capacity").unwrap()),
            "1000"
        );
        assert_eq!(render(lookup(&value, "correlator.key_prefix").unwrap()), "reply:");
        assert!(lookup(&value, "router.nope").is_err());
    }
}
