//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: errors returned by plain JSON endpoints (config, health, model status).
//!   They implement actix's `ResponseError` so handlers can return them with `?`.
//! - **PipelineError**: everything that can end an analysis run. These never reach the
//!   HTTP layer as faults; the orchestrator turns each one into exactly one failure
//!   result event on the progress stream.
//!
//! ## Pipeline error taxonomy:
//! - **Validation**: the input file is unusable before any stage starts
//! - **UnreadableInput / Decode**: the recording (or one of its segments) cannot be decoded
//! - **SchemaMismatch**: feature extractor, pipeline settings and scaler disagree
//! - **NoUsableSegments**: every segment failed extraction
//! - **ModelLoad**: scaler or classifier artifacts are missing or inconsistent

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the JSON endpoints.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (filesystem failures, poisoned state, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Window length must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `anyhow` errors from config validation and startup helpers become 500s.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Every way an analysis run can terminate without a prediction.
///
/// ## Rust Concepts:
/// - **thiserror**: derives `Display` and `std::error::Error` from the `#[error]` attributes
/// - **#[from]**: lets `?` convert `std::io::Error` into `PipelineError::Io` automatically
///
/// The `Display` text is what the caller sees in the failure result, so it is written
/// for humans rather than for log parsers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The uploaded file is unusable (wrong type, empty, missing)
    #[error("{0}")]
    Validation(String),

    /// The uploaded recording as a whole could not be decoded
    #[error("Could not decode audio: {0}")]
    UnreadableInput(String),

    /// A single segment's buffer could not be decoded
    #[error("Could not decode segment {ordinal}: {reason}")]
    Decode { ordinal: usize, reason: String },

    /// Extractor, pipeline and scaler disagree about the feature schema
    #[error("Feature schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Every segment failed feature extraction
    #[error("No usable audio segments: every segment failed feature extraction")]
    NoUsableSegments,

    /// Scaler or classifier artifacts are missing or incompatible
    #[error("Model artifacts could not be loaded: {0}")]
    ModelLoad(String),

    /// Window length was zero, negative or not finite
    #[error("Invalid segment window: {0} seconds")]
    InvalidWindow(f64),

    /// Resampler construction or processing failed
    #[error("Resampling failed for segment {ordinal}: {reason}")]
    Resample { ordinal: usize, reason: String },

    /// Tensor evaluation inside the classifier failed
    #[error("Classification failed: {0}")]
    Classification(String),

    /// A stage was entered out of order
    #[error("Illegal stage transition from {from} to {to}")]
    IllegalTransition { from: &'static str, to: &'static str },

    /// The caller went away or the run was cancelled externally
    #[error("Analysis cancelled")]
    Cancelled,

    /// Filesystem problems inside the run workspace
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<candle_core::Error> for PipelineError {
    fn from(err: candle_core::Error) -> Self {
        PipelineError::Classification(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_messages_are_human_readable() {
        let err = PipelineError::Decode { ordinal: 3, reason: "bad header".to_string() };
        assert_eq!(err.to_string(), "Could not decode segment 3: bad header");
        assert_eq!(
            PipelineError::Validation("Invalid file type. Only MP3 and WAV files are allowed.".to_string()).to_string(),
            "Invalid file type. Only MP3 and WAV files are allowed."
        );
    }

    #[test]
    fn test_app_error_status_codes() {
        let response = AppError::ValidationError("bad".to_string()).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::BAD_REQUEST);
        let response = AppError::ConfigError("bad".to_string()).error_response();
        assert_eq!(response.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
