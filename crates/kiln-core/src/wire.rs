//! Request and response bodies of the HTTP API.
//!
//! Shared by the server and the worker client so both ends agree on shape.

use crate::ids::{JobId, LeaseToken};
use crate::job::{Job, JobStatus, TerminalStatus, payload_base64};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubmitJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    pub arch: String,
    #[serde(with = "payload_base64")]
    #[schemars(with = "String")]
    pub payload: Vec<u8>,
}

/// Public view of a job. Never carries the lease token or the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResponse {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub arch: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub result: Option<Value>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            arch: job.arch.clone(),
            status: job.status,
            attempt: job.attempt,
            result: job.result.clone(),
            lease_expires_at: job.lease_expires_at,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Body of `POST /api/v1/leases`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LeaseRequest {
    pub arch: String,
    pub types: Vec<String>,
}

/// A granted lease: the token plus everything needed to run the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LeaseResponse {
    pub token: LeaseToken,
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub arch: String,
    pub attempt: u32,
    #[serde(with = "payload_base64")]
    #[schemars(with = "String")]
    pub payload: Vec<u8>,
    pub lease_expires_at: DateTime<Utc>,
}

/// Body of `PATCH /api/v1/leases/{token}`.
///
/// No status means heartbeat. A status finishes the job with `result`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UpdateJobRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TerminalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Metadata of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactInfo {
    pub name: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ListArtifactsResponse {
    pub artifacts: Vec<ArtifactInfo>,
    pub total: usize,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    pub message: String,
}
