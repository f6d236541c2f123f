use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::conversation::ConversationError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("LLM error: {0}")]
    LlmError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::Validation(msg) => ApiError::BadRequest(msg),
            ConversationError::SessionNotFound(id) => {
                ApiError::NotFound(format!("No history found for session '{}'", id))
            }
            ConversationError::Completion(msg) => ApiError::LlmError(msg),
            ConversationError::Capacity(msg) => ApiError::Unavailable(msg),
            // Retrieval failures are absorbed by the orchestrator; seeing one here is a bug
            ConversationError::Retrieval(msg) => ApiError::InternalError(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            },
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            },
            ApiError::Unavailable(msg) => {
                tracing::warn!("Unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Unavailable", msg)
            },
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            },
            ApiError::LlmError(msg) => {
                tracing::error!("LLM error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "LlmError", msg)
            },
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_errors_map_to_status_codes() {
        let cases = vec![
            (ConversationError::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (ConversationError::SessionNotFound("s1".into()), StatusCode::NOT_FOUND),
            (ConversationError::Completion("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ConversationError::Capacity("full".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ConversationError::Retrieval("oops".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
