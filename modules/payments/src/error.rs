use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::models::ErrorBody;

/// Errors surfaced directly to the HTTP client by the charge orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ChargeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("idempotency key already used with a different request body")]
    HashConflict,

    #[error("a request for this idempotency key is already in progress")]
    InProgressConflict,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ChargeError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            ChargeError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ChargeError::HashConflict => (
                StatusCode::CONFLICT,
                "hash_conflict",
                self.to_string(),
            ),
            ChargeError::InProgressConflict => (
                StatusCode::CONFLICT,
                "in_progress_conflict",
                self.to_string(),
            ),
            ChargeError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "the request could not be completed; it is safe to retry with the same key".to_string(),
            ),
        };
        (status, Json(ErrorBody::new(error, message))).into_response()
    }
}

/// Errors raised by the persistence layer (C3/C4/C5). Internal to the
/// orchestrator; never surfaced to the client directly — `ChargeError::Store`
/// wraps this into a uniform 5xx.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated")]
    UniqueViolation,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation;
            }
        }
        StoreError::Database(err)
    }
}

/// Errors raised while dispatching a batch of outbox events. Never surfaces
/// to an HTTP client; the dispatcher records it on the event row and moves on.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("bus publish failed: {0}")]
    Publish(String),

    #[error("bus publish timed out")]
    Timeout,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
