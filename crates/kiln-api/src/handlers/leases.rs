//! Worker-facing lease handlers: claim, heartbeat/complete, upload.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kiln_artifacts::ArtifactInfo;
use kiln_core::{CapabilityFilter, Error};
use kiln_core::wire::{JobResponse, LeaseRequest, LeaseResponse, UpdateJobRequest};
use kiln_scheduler::LeaseUpdate;
use std::sync::Arc;
use tracing::debug;

use super::parse_token;
use crate::error::ApiError;
use crate::state::AppState;

/// Claim the oldest matching pending job. 204 when there is none.
pub async fn request_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LeaseRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    if request.arch.trim().is_empty() || request.types.is_empty() {
        return Err(ApiError::bad_request("arch and at least one type are required"));
    }

    let filter = CapabilityFilter::with_types(request.types, request.arch);
    let Some(grant) = state.leases.request_job(&filter).await? else {
        debug!(arch = %filter.arch, "No matching job");
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let lease_expires_at = grant.job.lease_expires_at.ok_or_else(|| {
        Error::Internal(format!("granted lease on {} has no deadline", grant.job.id))
    })?;

    let response = LeaseResponse {
        token: grant.token,
        job_id: grant.job.id,
        job_type: grant.job.job_type,
        arch: grant.job.arch,
        attempt: grant.job.attempt,
        payload: grant.job.payload,
        lease_expires_at,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Heartbeat (empty body or no status) or final update.
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<Json<JobResponse>, ApiError> {
    let token = parse_token(&token)?;
    let request: UpdateJobRequest = if body.is_empty() {
        UpdateJobRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid update body: {e}")))?
    };

    let update = match (request.status, request.result) {
        (None, None) => LeaseUpdate::Heartbeat,
        (None, Some(_)) => {
            return Err(ApiError::bad_request("result requires a final status"));
        }
        (Some(status), result) => LeaseUpdate::Complete {
            status,
            result: result.unwrap_or(serde_json::Value::Null),
        },
    };

    let job = state.leases.renew_or_update(token, update).await?;
    Ok(Json(JobResponse::from(&job)))
}

pub async fn upload_artifact(
    State(state): State<Arc<AppState>>,
    Path((token, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<ArtifactInfo>), ApiError> {
    let token = parse_token(&token)?;
    let info = state.artifacts.put(token, &name, &body).await?;
    Ok((StatusCode::CREATED, Json(info)))
}
