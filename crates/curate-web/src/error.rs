use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use curate_sync::ConsoleError;
use serde_json::json;

/// Handler error rendered as `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Console(#[from] ConsoleError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Console(err) => match err {
                ConsoleError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION")
                }
                ConsoleError::ActionInProgress => (StatusCode::CONFLICT, "ACTION_IN_PROGRESS"),
                ConsoleError::EmptySelection => (StatusCode::BAD_REQUEST, "EMPTY_SELECTION"),
                ConsoleError::NothingToRetry => (StatusCode::BAD_REQUEST, "NOTHING_TO_RETRY"),
                ConsoleError::UnknownProduct(_) => (StatusCode::NOT_FOUND, "UNKNOWN_PRODUCT"),
                ConsoleError::UnknownJob(_) => (StatusCode::NOT_FOUND, "UNKNOWN_JOB"),
                ConsoleError::ActionRefused { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "ACTION_REFUSED")
                }
                ConsoleError::JobRefused { .. } => (StatusCode::CONFLICT, "JOB_REFUSED"),
                ConsoleError::TransientNetwork(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::warn!(error = %self, "upstream call failed");
        }
        let body = json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}
