//! Error types for the server application

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Server start-up error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Core domain error: {0}")]
    Core(#[from] banking_mcp_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] banking_mcp_core::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Core(err) if err.is_validation() => StatusCode::BAD_REQUEST,
            AppError::Core(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            AppError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "validation",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Core(err) => err.category(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(category = self.category(), error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
            "category": self.category(),
        }));
        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}
