use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid state-machine transition. Carries the states the caller is
    /// allowed to move to, so clients need not duplicate the table.
    #[error("Invalid transition: {message}")]
    StateMachine {
        message: String,
        allowed: Vec<String>,
    },

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, extra) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            AppError::StateMachine { message, allowed } => (
                StatusCode::CONFLICT,
                message.clone(),
                Some(json!({ "allowed": allowed })),
            ),
            AppError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("Rate limit exceeded, retry in {retry_after_secs}s"),
                Some(json!({ "retryAfterSecs": retry_after_secs })),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into(), None)
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".into(), None)
            }
            AppError::Reqwest(e) => {
                tracing::error!("HTTP client error: {e}");
                (StatusCode::BAD_GATEWAY, "Upstream service error".into(), None)
            }
            AppError::SerdeJson(e) => {
                tracing::error!("Serialization error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error".into(), None)
            }
            AppError::Other(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into(), None)
            }
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "timestamp": Utc::now(),
        });
        if let Some(extra) = extra {
            for (k, v) in extra.as_object().into_iter().flatten() {
                body[k.as_str()] = v.clone();
            }
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
