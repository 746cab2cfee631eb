use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use vm_orchestrator::OrchestratorError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Orchestrator(err) => match err.root() {
                OrchestratorError::QuotaExceeded { .. } => StatusCode::CONFLICT,
                OrchestratorError::NoEntitlement { .. } => StatusCode::PAYMENT_REQUIRED,
                OrchestratorError::OwnershipViolation { .. } | OrchestratorError::Forbidden(_) => {
                    StatusCode::FORBIDDEN
                }
                OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::Conflict(_) | OrchestratorError::InvalidState(_) => {
                    StatusCode::CONFLICT
                }
                OrchestratorError::Transport(_) | OrchestratorError::Command { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::BadRequest(_) => "invalid_input",
            ApiError::Orchestrator(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }

        let message = match &self {
            // Database internals stay in the log.
            ApiError::Orchestrator(err) if err.kind() == "internal" => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({ "error": message, "code": self.code() });
        if let ApiError::Orchestrator(err) = &self {
            if !err.warnings().is_empty() {
                body["warnings"] = json!(err.warnings());
            }
        }

        (status, Json(body)).into_response()
    }
}
