use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

/// Error taxonomy for the ingest/fanout API. Validation and conflict are
/// returned directly to the caller; store/broker failures bubble up as 5xx.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(#[from] event_bus::BusError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            IngestError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            IngestError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "resource not found".to_string(),
            ),
            IngestError::Store(e) => {
                tracing::error!(error = %e, "store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    "internal storage error".to_string(),
                )
            }
            IngestError::Broker(e) => {
                tracing::error!(error = %e, "broker error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "broker_error",
                    "internal broker error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse::new(error, message))).into_response()
    }
}

/// Worker-side errors. These never reach a caller — they drive the state
/// machine and are logged with structured fields.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("malformed task: {0}")]
    MalformedTask(String),

    #[error("endpoint secret missing")]
    MissingSecret,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
