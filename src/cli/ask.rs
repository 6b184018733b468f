//! `switchyard ask`: one request, one final answer.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::time::Duration;
use switchyard_core::{format_error_for_cli, Message};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::server::{load_config, start_fabric};

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Agent to ask (e.g. echo, researcher)
    pub agent: String,
    /// Request text
    pub message: String,
    /// Conversation the request belongs to
    #[arg(short, long, default_value = "cli")]
    pub conversation: String,
    /// Seconds to wait for the final answer (defaults to correlator.wait_timeout_secs)
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

pub async fn run(args: AskArgs) -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    let fabric = start_fabric(&config).await?;
    let coordinator = fabric.coordinator;

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.correlator.wait_timeout());
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    debug!(agent = %args.agent, timeout_secs = timeout.as_secs(), "Submitting request");
    let result = coordinator
        .submit_with_timeout(
            &args.conversation,
            Message::request("cli", args.agent, args.message),
            timeout,
            &cancel,
        )
        .await;
    coordinator.shutdown().await;

    match result {
        Ok(answer) => {
            println!("{}", answer);
            Ok(())
        }
        Err(e) => bail!(format_error_for_cli(&e)),
    }
}
