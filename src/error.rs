// src/error.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

/// Every failure a handler can surface. Rendered as `{ "error": "..." }`.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed request fields (400)
    #[error("{0}")]
    Validation(String),

    /// Unknown task, session, or similar (404)
    #[error("{0} not found")]
    NotFound(String),

    /// Stale conversation state write (409)
    #[error("{0}")]
    Conflict(String),

    /// Bad bearer token (401)
    #[error("Invalid token: {0}")]
    Unauthorized(String),

    /// The text-generation service failed or returned garbage (500)
    #[error("Text generation failed: {0}")]
    Upstream(String),

    /// Database failure (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Startup configuration problem
    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    /// The message a caller gets to see. Server-side failures are logged in
    /// full and surfaced generically.
    fn public_message(&self) -> String {
        match self {
            AppError::Upstream(_) => {
                "The assistant is unavailable right now. Please try again later.".to_string()
            }
            AppError::Storage(_) | AppError::Config(_) => "Server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) | AppError::Storage(_) | AppError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("Rejected request: {}", self);
        }
        HttpResponse::build(status).json(ErrorBody {
            error: self.public_message(),
        })
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for AppError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        AppError::Storage(format!("Error serializing document: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}
