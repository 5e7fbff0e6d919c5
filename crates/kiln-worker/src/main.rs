//! Kiln build worker entrypoint.

use anyhow::Context;
use clap::Parser;
use kiln_worker::{BuildWorker, CommandExecutor, WorkerClient, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kiln-worker")]
#[command(author, version, about = "Kiln build worker", long_about = None)]
struct Cli {
    /// Path to the worker configuration file.
    #[arg(short, long, env = "KILN_WORKER_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL.
    #[arg(long, env = "KILN_SERVER_URL")]
    server_url: Option<String>,

    /// Architecture to advertise.
    #[arg(long)]
    arch: Option<String>,

    /// Job type to accept. Repeatable.
    #[arg(long = "type")]
    types: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => WorkerConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if let Some(arch) = cli.arch {
        config.arch = arch;
    }
    if !cli.types.is_empty() {
        config.types = cli.types;
    }
    anyhow::ensure!(!config.types.is_empty(), "No job types configured");

    let client = WorkerClient::from_config(&config)?;
    let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
    let worker = BuildWorker::new(config, client, executor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current job");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
