//! Domain error types for the Simulation Rerun Server.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

use actix_web::{HttpResponse, ResponseError};
use std::fmt;
use std::path::PathBuf;

/// Errors raised by the job driver's stages.
///
/// None of these cross the driver boundary as values: the driver converts
/// every variant into a terminal `failed` status with the message surfaced
/// through the job's `message` and `output_lines`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A required location or identity input is missing. Fatal; raised
    /// before any process runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The per-component template document required for config prep could
    /// not be located. Fatal for the whole job.
    #[error("Template artifact not found: {}", .0.display())]
    TemplateArtifactNotFound(PathBuf),

    /// The runner executable (or its shell) could not be started. Fatal;
    /// no output lines were produced.
    #[error("Failed to launch runner process: {0}")]
    ProcessLaunch(String),

    /// The runner exited non-zero. The job is marked failed but verdict
    /// resolution still runs against the partial output and filesystem
    /// state.
    #[error("Runner exited with return code {0}")]
    ProcessExecution(i32),

    /// Filesystem or I/O failure in a fatal stage (staging dirs, document
    /// writes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The rerun configuration document could not be parsed or rewritten.
    #[error("Configuration document error: {0}")]
    Document(String),
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Document(err.to_string())
    }
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal failure while accepting a job
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_code) = match self {
            ApiError::InvalidInput(_) => {
                (actix_web::http::StatusCode::BAD_REQUEST, "INVALID_INPUT")
            }
            ApiError::Internal(err_str) => {
                tracing::error!("Internal error: {}", err_str);
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                )
            }
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_code.to_string(),
            message: self.to_string(),
        })
    }
}

/// Error response body returned by the API.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

/// Convenience type alias for Results with ApiError.
pub type ApiResult<T> = Result<T, ApiError>;
