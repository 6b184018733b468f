//! CLI module for Switchyard
//!
//! Provides commands:
//! - `serve`: Run the coordination fabric until interrupted
//! - `ask`: Send one request to an agent and print the final answer
//! - `config`: Inspect the effective configuration

use clap::{Parser, Subcommand};

pub mod ask;
pub mod config;

/// Switchyard agent coordination fabric
#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "Agent coordination fabric")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the fabric
    Serve,
    /// Ask an agent and wait for its final answer
    Ask(ask::AskArgs),
    /// Inspect configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run().await,
        Some(Commands::Ask(args)) => ask::run(args).await,
        Some(Commands::Config(cmd)) => config::run(cmd),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
