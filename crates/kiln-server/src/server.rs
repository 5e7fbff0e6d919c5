//! Component wiring and server lifecycle.

use anyhow::Context;
use axum::Router;
use kiln_api::{AppState, create_router};
use kiln_artifacts::{ArtifactStore, FilesystemBackend};
use kiln_core::ports::JobStore;
use kiln_db::{Database, MemoryJobStore};
use kiln_scheduler::{LeaseManager, LeaseSweeper, StatusAggregator};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ServerConfig;

/// A fully wired server, ready to serve.
pub struct Server {
    state: Arc<AppState>,
    leases: Arc<LeaseManager>,
    database: Option<Database>,
}

impl Server {
    /// Open the job store and build every component.
    pub async fn build(config: &ServerConfig) -> anyhow::Result<Self> {
        let (store, database): (Arc<dyn JobStore>, Option<Database>) = match &config.database_url {
            Some(url) => {
                let database = Database::open(url)
                    .await
                    .context("Failed to open job database")?;
                (Arc::new(database.job_store()), Some(database))
            }
            None => {
                warn!("No database configured, jobs are kept in memory and lost on restart");
                (Arc::new(MemoryJobStore::new()), None)
            }
        };

        tokio::fs::create_dir_all(&config.artifacts.root_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create artifact directory {}",
                    config.artifacts.root_dir.display()
                )
            })?;

        let leases = Arc::new(LeaseManager::new(store.clone(), config.lease.clone()));
        let backend = Arc::new(FilesystemBackend::new(config.artifacts.root_dir.clone()));
        let artifacts = Arc::new(ArtifactStore::new(backend, leases.clone(), &config.artifacts));
        let status = Arc::new(StatusAggregator::new(store, config.lease.max_attempts));

        Ok(Self {
            state: Arc::new(AppState::new(leases.clone(), artifacts, status)),
            leases,
            database,
        })
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    /// Serve on `listener` until `shutdown` resolves, then stop the sweeper
    /// and close the database.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (sweeper_tx, sweeper_rx) = watch::channel(false);
        let sweeper = LeaseSweeper::new(self.leases.clone()).spawn(sweeper_rx);

        info!(addr = %listener.local_addr()?, "Serving");
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = sweeper_tx.send(true);
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Lease sweeper task ended abnormally");
        }
        if let Some(database) = &self.database {
            database.close().await;
        }

        served.context("HTTP server failed")?;
        info!("Server stopped");
        Ok(())
    }
}
