//! Error to HTTP response mapping.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kiln_core::Error;
use kiln_core::wire::ErrorBody;
use tracing::error;

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

/// HTTP status for a core error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::JobNotFound(_) | Error::ArtifactNotFound { .. } => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::InvalidToken => StatusCode::CONFLICT,
        Error::LeaseExpired { .. } => StatusCode::GONE,
        Error::CapacityExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::InvalidArtifactName(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::Database(_)
        | Error::Storage(_)
        | Error::Io(_)
        | Error::Serialization(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}
