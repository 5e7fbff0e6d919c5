//! Request handlers organized by resource.

pub mod health;
pub mod jobs;
pub mod leases;
pub mod status;

use kiln_core::ids::{JobId, LeaseToken};

use crate::error::ApiError;

pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid job ID: {raw}")))
}

pub(crate) fn parse_token(raw: &str) -> Result<LeaseToken, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Malformed lease token"))
}
