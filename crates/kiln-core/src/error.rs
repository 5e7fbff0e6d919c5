//! Error types for Kiln.

use crate::ids::JobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Artifact not found: {job_id}/{name}")]
    ArtifactNotFound { job_id: JobId, name: String },

    // Lease errors
    #[error("Compare-and-swap lost for job {0}")]
    Conflict(JobId),

    #[error("Lease token is not valid for any running job")]
    InvalidToken,

    #[error("Lease expired at {expired_at}")]
    LeaseExpired {
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    // Request validation
    #[error("{what} too large: {size} bytes (limit {limit})")]
    CapacityExceeded {
        what: &'static str,
        size: u64,
        limit: u64,
    },

    #[error("Invalid artifact name: {0:?}")]
    InvalidArtifactName(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for rejections that mean the caller no longer owns the job.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, Error::InvalidToken | Error::LeaseExpired { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
