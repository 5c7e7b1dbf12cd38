use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// File is not a readable zip container.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Container pointer or package document missing or unparseable.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A declared cover entry could not be read.
    #[error("Cover error: {0}")]
    Cover(String),

    /// Archive has no entries where at least one was required.
    #[error("Empty archive: {0}")]
    EmptyArchive(String),

    /// The store already holds an entry for this path.
    #[error("Duplicate path: {0}")]
    DuplicatePath(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            AppError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self, "Request error");

        (status, self.to_string()).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
