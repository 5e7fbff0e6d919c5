//! PostgreSQL-backed test context.

use crate::containers::PostgresContainer;
use kiln_core::ports::JobStore;
use kiln_db::Database;
use std::sync::Arc;

/// A migrated database in a fresh container.
///
/// Drop this to stop the container.
pub struct PostgresContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl PostgresContext {
    pub async fn start() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::open(postgres.url()).await?;

        Ok(Self { postgres, db })
    }

    pub fn db_url(&self) -> &str {
        self.postgres.url()
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::new(self.db.job_store())
    }
}
