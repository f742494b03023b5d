use crate::errors::{ArtifactError, IncidentflowError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`IncidentflowError`] for domain errors and adds HTTP-specific
/// variants. Renders as `{ "error": .., "code": .. }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error.
    #[error(transparent)]
    Core(#[from] IncidentflowError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Core(core) => {
                let code = core.code();
                match core {
                    IncidentflowError::NotFound(_) => {
                        (StatusCode::NOT_FOUND, code, "Job not found".to_string())
                    }
                    IncidentflowError::InvalidTransition(err) => {
                        (StatusCode::CONFLICT, code, err.reason.clone())
                    }
                    IncidentflowError::Validation(msg) => {
                        (StatusCode::BAD_REQUEST, code, msg.clone())
                    }
                    IncidentflowError::Artifact(ArtifactError::NotFound { .. }) => {
                        (StatusCode::NOT_FOUND, code, "File not found".to_string())
                    }
                    IncidentflowError::Artifact(ArtifactError::InvalidPath { path }) => (
                        StatusCode::BAD_REQUEST,
                        code,
                        format!("Invalid artifact path: {path}"),
                    ),
                    other => {
                        tracing::error!(error = %other, "Internal error");
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "INTERNAL_ERROR",
                            "An internal error occurred".to_string(),
                        )
                    }
                }
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}
