//! langbridge: host binary for one language server.
//!
//! ```text
//! main() -> Config::from_cli -> LspClient::spawn -> initialize -> wait for trigger -> close
//! ```
//!
//! Stdout is left untouched for the tool protocol; logs go to stderr or to
//! `--log-file`.

mod config;
mod shutdown;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use langbridge_lsp::{LifecycleState, LspClient};

use crate::config::{Cli, Config};

/// Time given to the server to finish start-up work after the handshake.
const SERVER_SETTLE: Duration = Duration::from_secs(1);

/// How often the client is checked for a lost server.
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = Config::from_cli(cli).context("invalid configuration")?;
    tracing::info!(
        workspace = %config.workspace.display(),
        lsp = %config.lsp_command,
        "langbridge starting"
    );
    run(config).await
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(env_filter)
                .init();
        }
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    std::env::set_current_dir(&config.workspace).with_context(|| {
        format!(
            "failed to change to workspace directory {}",
            config.workspace.display()
        )
    })?;

    let client = LspClient::spawn(&config.lsp_command, &config.lsp_args)
        .context("failed to start language server")?;

    if let Err(e) = start(&client, &config).await {
        tracing::error!(error = %e, "Language server failed to start");
        close(&client).await;
        return Err(e);
    }

    tokio::select! {
        trigger = shutdown::wait_for_trigger() => {
            tracing::info!(%trigger, pid = std::process::id(), "Shutdown triggered");
        }
        reason = server_lost(&client) => {
            tracing::error!(reason = %reason, "Language server is gone, shutting down");
        }
    }

    close(&client).await;
    tracing::info!(pid = std::process::id(), "Shutdown complete");
    Ok(())
}

async fn start(client: &LspClient, config: &Config) -> Result<()> {
    let result = client
        .initialize(&config.workspace, config.lsp_options.clone())
        .await
        .context("initialize failed")?;
    tracing::debug!(capabilities = %result.capabilities, "Server capabilities");

    client
        .wait_for_server_ready(SERVER_SETTLE)
        .await
        .context("language server did not become ready")?;
    Ok(())
}

/// Resolves once the client has lost its server.
async fn server_lost(client: &LspClient) -> String {
    let mut ticker = tokio::time::interval(SERVER_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if let LifecycleState::Error(reason) = client.state() {
            return reason;
        }
    }
}

async fn close(client: &LspClient) {
    match client.close().await {
        Ok(Some(status)) => tracing::info!(%status, "Language server process exited"),
        Ok(None) => {}
        Err(e) => tracing::error!(error = %e, "Failed to shut down language server"),
    }
}
