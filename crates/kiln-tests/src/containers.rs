//! PostgreSQL testcontainer.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

const POSTGRES_TAG: &str = "16-alpine";
const DB_NAME: &str = "kiln";

/// A throwaway PostgreSQL server. The container stops when this is dropped.
pub struct PostgresContainer {
    _container: ContainerAsync<Postgres>,
    url: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default()
            .with_db_name(DB_NAME)
            .with_tag(POSTGRES_TAG)
            .start()
            .await?;
        let url = format!(
            "postgres://postgres:postgres@{}:{}/{DB_NAME}",
            container.get_host().await?,
            container.get_host_port_ipv4(5432).await?,
        );

        Ok(Self {
            _container: container,
            url,
        })
    }

    /// Connection URL for the `kiln` database.
    pub fn url(&self) -> &str {
        &self.url
    }
}
