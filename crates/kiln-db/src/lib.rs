//! Job store implementations for Kiln.
//!
//! `PgJobStore` is the durable store used in production. `MemoryJobStore`
//! keeps everything in-process and is meant for tests and local development.

pub mod memory;
pub mod repositories;

pub use memory::MemoryJobStore;
pub use repositories::*;

use kiln_core::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

const MAX_CONNECTIONS: u32 = 20;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle on the PostgreSQL pool behind [`PgJobStore`].
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to `url` and bring the schema up to date.
    pub async fn open(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| Error::Database(format!("connect: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Database(format!("migrate: {e}")))?;

        info!(max_connections = MAX_CONNECTIONS, "Job database ready");
        Ok(Self { pool })
    }

    pub fn job_store(&self) -> PgJobStore {
        PgJobStore::new(self.pool.clone())
    }

    /// Wait for in-flight queries, then drop every connection.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Job database closed");
    }
}
