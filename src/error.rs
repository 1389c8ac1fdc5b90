use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Poll not found")]
    NotFound,
    #[error("Option index is out of range")]
    InvalidVoteIndex,
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Concurrent write conflict, retries exhausted")]
    Conflict,
    #[error("Already voted on this poll")]
    AlreadyVoted,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl PollError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PollError::ValidationError(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PollError::Unauthorized => StatusCode::UNAUTHORIZED,
            PollError::NotFound => StatusCode::NOT_FOUND,
            PollError::InvalidVoteIndex => StatusCode::BAD_REQUEST,
            PollError::ValidationError(_) => StatusCode::BAD_REQUEST,
            PollError::Conflict => StatusCode::CONFLICT,
            PollError::AlreadyVoted => StatusCode::CONFLICT,
            PollError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            PollError::Unauthorized => "Unauthorized",
            PollError::NotFound => "Poll not found",
            PollError::InvalidVoteIndex => "Invalid vote index",
            PollError::ValidationError(_) => "Invalid request",
            PollError::Conflict => "Conflict",
            PollError::AlreadyVoted => "User already voted on this poll",
            PollError::DatabaseError(_) => "Database error",
        };

        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, "request rejected");
        }

        let body = Json(json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for PollError {
    fn from(error: sqlx::Error) -> Self {
        // serialization_failure / deadlock_detected are retryable
        let retryable = error
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == "40001" || code == "40P01");

        if retryable {
            PollError::Conflict
        } else {
            PollError::DatabaseError(error.to_string())
        }
    }
}

impl From<JsonRejection> for PollError {
    fn from(rejection: JsonRejection) -> Self {
        PollError::ValidationError(rejection.body_text())
    }
}

impl From<serde_json::Error> for PollError {
    fn from(error: serde_json::Error) -> Self {
        PollError::ValidationError(error.to_string())
    }
}
