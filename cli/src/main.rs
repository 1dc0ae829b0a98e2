//! remote-sync command-line interface.
//!
//! Loads the workspace's `.vscode/sftp.json`, resolves the configuration
//! governing a path and moves files between the workspace and the remote.

mod cli;
mod commands;
mod terminal;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON results.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    info!(workspace = %workspace.display(), "remote-sync {}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling transfers");
            on_interrupt.cancel();
        }
    });

    commands::execute(cli.command, workspace, cancel).await
}
