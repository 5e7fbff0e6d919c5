//! Queue status handler.

use axum::{Json, extract::State};
use kiln_core::QueueStatus;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn queue_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStatus>, ApiError> {
    Ok(Json(state.status.snapshot().await?))
}
