//! Error taxonomy shared by the camera, motion and HTTP layers.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

/// Errors surfaced to HTTP clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// A still capture (or reinitialization) is already in flight. Retryable.
    #[error("Camera busy: another still capture is in progress")]
    CameraBusy,

    /// The camera reported an error. Once the source is faulted, only an
    /// explicit reinitialization brings it back.
    #[error("Camera fault: {0}")]
    CameraFault(String),

    /// Malformed or missing request parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A motor or LED write failed. Never retried.
    #[error("Actuator fault on {actuator}: {message}")]
    Actuator { actuator: String, message: String },

    /// The server is stopping and no longer accepts work.
    #[error("Shutting down")]
    ShuttingDown,
}

impl StageError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StageError::CameraBusy | StageError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            StageError::CameraFault(_) | StageError::Actuator { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            StageError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for StageError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }

        match self {
            StageError::CameraBusy => {
                (status, [(header::RETRY_AFTER, "1")], self.to_string()).into_response()
            }
            _ => (status, self.to_string()).into_response(),
        }
    }
}
