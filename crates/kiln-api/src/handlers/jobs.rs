//! Job submission, lookup and artifact download handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use kiln_core::wire::{JobResponse, ListArtifactsResponse, SubmitJobRequest};
use std::sync::Arc;

use super::parse_job_id;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let Json(request) = body?;
    let job = state
        .leases
        .submit(request.job_type, request.arch, request.payload)
        .await?;

    Ok((StatusCode::CREATED, Json(JobResponse::from(&job))))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = state.store.get(job_id).await?;
    Ok(Json(JobResponse::from(&job)))
}

pub async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ListArtifactsResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let artifacts = state.artifacts.list(job_id).await?;

    Ok(Json(ListArtifactsResponse {
        total: artifacts.len(),
        artifacts,
    }))
}

pub async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&id)?;
    let content = state.artifacts.get(job_id, &name).await?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        content,
    )
        .into_response())
}
