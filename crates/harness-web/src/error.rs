use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use harnessd::{OrchestratorError, RemediationError, ServiceError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Conflict(_) => StatusCode::CONFLICT,
            WebError::Internal(_) | WebError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<OrchestratorError> for WebError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::Catalog(_) | OrchestratorError::InvalidConfig(_) => {
                WebError::BadRequest(message)
            }
            OrchestratorError::RunNotFound { .. } => WebError::NotFound(message),
            OrchestratorError::RunNotTerminal { .. } => WebError::Conflict(message),
            OrchestratorError::Persistence(_) | OrchestratorError::Poisoned => {
                WebError::Internal(message)
            }
        }
    }
}

impl From<RemediationError> for WebError {
    fn from(err: RemediationError) -> Self {
        let message = err.to_string();
        match err {
            RemediationError::NoErrors
            | RemediationError::UnknownErrors { .. }
            | RemediationError::IncompatibleErrors { .. }
            | RemediationError::NotResolution { .. } => WebError::BadRequest(message),
            RemediationError::NotFound { .. } | RemediationError::ErrorNotFound { .. } => {
                WebError::NotFound(message)
            }
            RemediationError::AlreadyAttached { .. }
            | RemediationError::NotReprocessable { .. }
            | RemediationError::Transition(_) => WebError::Conflict(message),
            RemediationError::WaitTimedOut { .. }
            | RemediationError::Persistence(_)
            | RemediationError::Poisoned => WebError::Internal(message),
        }
    }
}

impl From<ServiceError> for WebError {
    fn from(err: ServiceError) -> Self {
        WebError::Internal(err.to_string())
    }
}
