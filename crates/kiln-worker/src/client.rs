//! HTTP client for the Kiln server API.

use kiln_core::ids::{JobId, LeaseToken};
use kiln_core::job::TerminalStatus;
use kiln_core::status::QueueStatus;
use kiln_core::wire::{
    ArtifactInfo, ErrorBody, JobResponse, LeaseRequest, LeaseResponse, ListArtifactsResponse,
    SubmitJobRequest, UpdateJobRequest,
};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::WorkerConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Lease token rejected: {0}")]
    InvalidToken(String),

    #[error("Lease expired: {0}")]
    LeaseExpired(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ClientError {
    /// The server no longer recognizes this worker as the lease holder.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, Self::InvalidToken(_) | Self::LeaseExpired(_))
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Client for the `/api/v1` surface.
#[derive(Clone)]
pub struct WorkerClient {
    client: Client,
    base_url: Url,
}

impl WorkerClient {
    pub fn new(server_url: &str, timeout: Duration) -> ClientResult<Self> {
        let base_url = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|e| ClientError::InvalidUrl(format!("{server_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(server_url.to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &WorkerConfig) -> ClientResult<Self> {
        Self::new(&config.server_url, config.request_timeout())
    }

    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> ClientResult<reqwest::RequestBuilder> {
        Ok(self.client.request(method, self.url(segments)?))
    }

    /// Enqueue a job.
    pub async fn submit_job(
        &self,
        job_type: &str,
        arch: &str,
        payload: Vec<u8>,
    ) -> ClientResult<JobResponse> {
        let body = SubmitJobRequest {
            job_type: job_type.to_string(),
            arch: arch.to_string(),
            payload,
        };
        let res = self.request(Method::POST, &["jobs"])?.json(&body).send().await?;
        Ok(check(res).await?.json().await?)
    }

    /// Ask for work. `None` means nothing matched.
    pub async fn request_job(&self, arch: &str, types: &[String]) -> ClientResult<Option<LeaseResponse>> {
        let body = LeaseRequest {
            arch: arch.to_string(),
            types: types.to_vec(),
        };
        let res = self.request(Method::POST, &["leases"])?.json(&body).send().await?;
        let res = check(res).await?;

        if res.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(res.json().await?))
    }

    /// Extend the lease.
    pub async fn heartbeat(&self, token: LeaseToken) -> ClientResult<JobResponse> {
        self.update(token, &UpdateJobRequest::default()).await
    }

    /// Report the final status and result, releasing the lease.
    pub async fn complete(
        &self,
        token: LeaseToken,
        status: TerminalStatus,
        result: Value,
    ) -> ClientResult<JobResponse> {
        let body = UpdateJobRequest {
            status: Some(status),
            result: Some(result),
        };
        self.update(token, &body).await
    }

    async fn update(&self, token: LeaseToken, body: &UpdateJobRequest) -> ClientResult<JobResponse> {
        let token = token.to_string();
        let res = self
            .request(Method::PATCH, &["leases", &token])?
            .json(body)
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    pub async fn upload_artifact(
        &self,
        token: LeaseToken,
        name: &str,
        content: Vec<u8>,
    ) -> ClientResult<ArtifactInfo> {
        let token = token.to_string();
        let res = self
            .request(Method::PUT, &["leases", &token, "artifacts", name])?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    pub async fn get_job(&self, id: JobId) -> ClientResult<JobResponse> {
        let id = id.to_string();
        let res = self.request(Method::GET, &["jobs", &id])?.send().await?;
        Ok(check(res).await?.json().await?)
    }

    pub async fn list_artifacts(&self, id: JobId) -> ClientResult<Vec<ArtifactInfo>> {
        let id = id.to_string();
        let res = self
            .request(Method::GET, &["jobs", &id, "artifacts"])?
            .send()
            .await?;
        let listed: ListArtifactsResponse = check(res).await?.json().await?;
        Ok(listed.artifacts)
    }

    pub async fn download_artifact(&self, id: JobId, name: &str) -> ClientResult<Vec<u8>> {
        let id = id.to_string();
        let res = self
            .request(Method::GET, &["jobs", &id, "artifacts", name])?
            .send()
            .await?;
        Ok(check(res).await?.bytes().await?.to_vec())
    }

    pub async fn queue_status(&self) -> ClientResult<QueueStatus> {
        let res = self.request(Method::GET, &["status"])?.send().await?;
        Ok(check(res).await?.json().await?)
    }
}

/// Pass successful responses through; turn the rest into typed errors.
async fn check(res: Response) -> ClientResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let text = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.message)
        .unwrap_or(text);
    debug!(status = status.as_u16(), message = %message, "Server returned error");

    Err(match status {
        StatusCode::CONFLICT => ClientError::InvalidToken(message),
        StatusCode::GONE => ClientError::LeaseExpired(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        s if s.is_client_error() => ClientError::Rejected {
            status: s.as_u16(),
            message,
        },
        s => ClientError::Server {
            status: s.as_u16(),
            message,
        },
    })
}
