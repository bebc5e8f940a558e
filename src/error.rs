use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::PartyError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Viewer identity required")]
    Unauthorized,

    #[error("Only the host can control playback")]
    NotAuthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("External service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code, shared by HTTP bodies and WebSocket error frames.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotAuthorized => "NOT_AUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotAuthorized => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Transport(_) | AppError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients. Internal details only go to the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg)
            | AppError::ServiceUnavailable(msg) => msg.clone(),
            AppError::Transport(msg) => {
                tracing::warn!("Transport error: {}", msg);
                msg.clone()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl AppError {
    /// Rebuilds an error from its wire `code`, as received by a client.
    pub fn from_wire(code: &str, message: String) -> Self {
        match code {
            "UNAUTHORIZED" => AppError::Unauthorized,
            "NOT_AUTHORIZED" => AppError::NotAuthorized,
            "NOT_FOUND" => AppError::NotFound(message),
            "BAD_REQUEST" => AppError::BadRequest(message),
            "CONFLICT" => AppError::Conflict(message),
            "RATE_LIMITED" => AppError::RateLimited,
            "VALIDATION_ERROR" => AppError::Validation(message),
            "SERVICE_UNAVAILABLE" => AppError::ServiceUnavailable(message),
            _ => AppError::Transport(format!("{}: {}", code, message)),
        }
    }
}

impl From<PartyError> for AppError {
    fn from(err: PartyError) -> Self {
        match err {
            PartyError::NotAuthorized => AppError::NotAuthorized,
            PartyError::NotParticipant(id) => {
                AppError::NotFound(format!("Participant {} is not in this watch party", id))
            }
            PartyError::Inactive => AppError::Conflict("Watch party is no longer active".into()),
            PartyError::InvalidTime(t) => {
                AppError::Validation(format!("Invalid playback position: {}", t))
            }
        }
    }
}

/// `{"error": {"code", "message"}}`, the body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.public_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
