//! In-process server harness and polling helpers.

use kiln_server::{Server, ServerConfig};
use kiln_worker::WorkerClient;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A running server on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
    _artifacts: TempDir,
}

impl TestServer {
    /// In-memory server with default lease settings.
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(ServerConfig::default()).await
    }

    /// Server with `config`; listen address and artifact root are replaced
    /// with test-local ones.
    pub async fn start_with(config: ServerConfig) -> anyhow::Result<Self> {
        Self::start_in(config, tempfile::tempdir()?).await
    }

    /// Server with `config` storing artifacts under `artifacts`.
    pub async fn start_in(mut config: ServerConfig, artifacts: TempDir) -> anyhow::Result<Self> {
        crate::init_test_logging();
        config.listen_addr = "127.0.0.1:0".to_string();
        config.artifacts.root_dir = artifacts.path().to_path_buf();

        let server = Server::build(&config).await?;
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let addr = listener.local_addr()?;

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        Ok(Self {
            addr,
            shutdown: Some(tx),
            handle: Some(handle),
            _artifacts: artifacts,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn worker_client(&self) -> WorkerClient {
        WorkerClient::new(&self.base_url(), Duration::from_secs(10))
            .expect("Failed to create worker client")
    }

    pub fn api(&self) -> ApiTestClient {
        ApiTestClient::new(self.addr)
    }

    /// Shut down gracefully and hand back the artifact directory.
    pub async fn stop(mut self) -> anyhow::Result<TempDir> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await??;
        }
        let placeholder = tempfile::tempdir()?;
        Ok(std::mem::replace(&mut self._artifacts, placeholder))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Plain HTTP access for paths the worker client does not cover.
pub struct ApiTestClient {
    client: Client,
    base_url: String,
}

impl ApiTestClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("http://{addr}"),
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(format!("{}{path}", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
    }

    /// True if `/health` answers with a success status.
    pub async fn health(&self) -> anyhow::Result<bool> {
        Ok(self.get("/health").await?.status().is_success())
    }
}

/// Poll `check` every `every` until it holds or `within` runs out.
pub async fn wait_for<F, Fut>(within: Duration, every: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let polling = async {
        while !check().await {
            tokio::time::sleep(every).await;
        }
    };
    tokio::time::timeout(within, polling).await.is_ok()
}
