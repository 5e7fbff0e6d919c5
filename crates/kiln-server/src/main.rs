//! Kiln server entrypoint.

use anyhow::Context;
use clap::Parser;
use kiln_server::logging::init_logging;
use kiln_server::{Server, ServerConfig};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kiln-server")]
#[command(author, version, about = "Kiln job dispatch server", long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "KILN_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(long)]
    listen: Option<String>,

    /// PostgreSQL URL, overriding the configuration file.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }

    init_logging(&config.log);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Kiln server");

    let server = Server::build(&config).await?;
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    server
        .serve(listener, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
}
