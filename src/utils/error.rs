//! Error types and handling
//!
//! Common error types used across the recorder.

use crate::capture::CaptureError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The platform has no screen capture capability at all
    #[error("Screen recording is not supported: {0}")]
    CapabilityUnsupported(String),

    /// The user denied the request or the platform failed to open the capture
    #[error("Capture request failed: {0}")]
    CaptureRequestFailed(String),

    #[error("A capture session is already active")]
    SessionActive,

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),
}

impl From<CaptureError> for AppError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::Unsupported(msg) => AppError::CapabilityUnsupported(msg),
            CaptureError::Denied(msg) => AppError::CaptureRequestFailed(msg),
            CaptureError::Platform(msg) => AppError::CaptureRequestFailed(msg),
            CaptureError::Io(e) => AppError::CaptureRequestFailed(e.to_string()),
        }
    }
}

/// Error response for observers of the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        let code = match error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::CapabilityUnsupported(_) => "CAPABILITY_UNSUPPORTED",
            AppError::CaptureRequestFailed(_) => "CAPTURE_REQUEST_FAILED",
            AppError::SessionActive => "SESSION_ACTIVE",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::ArtifactNotFound(_) => "ARTIFACT_NOT_FOUND",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_capture_maps_to_request_failed() {
        let err: AppError = CaptureError::Denied("Permission denied by user".into()).into();
        assert!(matches!(err, AppError::CaptureRequestFailed(_)));

        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "CAPTURE_REQUEST_FAILED");
        assert!(response.message.contains("Permission denied by user"));
    }

    #[test]
    fn test_unsupported_capture_maps_to_capability_error() {
        let err: AppError = CaptureError::Unsupported("no display server".into()).into();
        assert_eq!(ErrorResponse::from(&err).code, "CAPABILITY_UNSUPPORTED");
    }
}
