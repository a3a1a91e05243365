//! Error handling for wmbench
//!
//! Every failure maps onto one of six error kinds so callers can tell a
//! rejected request from an internal fault without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for wmbench operations
pub type Result<T> = std::result::Result<T, WmError>;

/// The error taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptInput,
    AudioTooShort,
    InvalidParameter,
    NotFound,
    InternalProcessingFailure,
}

/// Main error type for wmbench operations
#[derive(Error, Debug)]
pub enum WmError {
    // Codec Errors
    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Corrupt audio input: {reason}")]
    CorruptInput {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Watermark Errors
    #[error("Audio too short for {method}: {duration_secs:.3}s (minimum {min_secs:.3}s)")]
    AudioTooShort {
        duration_secs: f64,
        min_secs: f64,
        method: String,
    },

    // Request Errors
    #[error("Invalid parameter '{field}': {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("Asset not found: {id}")]
    NotFound { id: String },

    // Processing Errors
    #[error("Internal processing failure: {reason}")]
    InternalProcessingFailure { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WmError {
    /// Shorthand for an `InvalidParameter` error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        WmError::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `CorruptInput` error without an underlying source
    pub fn corrupt(reason: impl Into<String>) -> Self {
        WmError::CorruptInput {
            reason: reason.into(),
            source: None,
        }
    }

    /// Shorthand for an `InternalProcessingFailure` error
    pub fn internal(reason: impl Into<String>) -> Self {
        WmError::InternalProcessingFailure {
            reason: reason.into(),
        }
    }

    /// Classify this error into the public taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            WmError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            WmError::CorruptInput { .. } => ErrorKind::CorruptInput,
            WmError::AudioTooShort { .. } => ErrorKind::AudioTooShort,
            WmError::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            WmError::NotFound { .. } => ErrorKind::NotFound,
            WmError::InternalProcessingFailure { .. }
            | WmError::Io(_)
            | WmError::Serialization(_) => ErrorKind::InternalProcessingFailure,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            WmError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            WmError::CorruptInput { .. } => "CORRUPT_INPUT",
            WmError::AudioTooShort { .. } => "AUDIO_TOO_SHORT",
            WmError::InvalidParameter { .. } => "INVALID_PARAMETER",
            WmError::NotFound { .. } => "NOT_FOUND",
            WmError::InternalProcessingFailure { .. } => "INTERNAL_PROCESSING_FAILURE",
            WmError::Io(_) => "IO_ERROR",
            WmError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// True when the request itself was at fault
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::InternalProcessingFailure
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            WmError::UnsupportedFormat { .. } => vec![
                "Convert the file to WAV, FLAC, MP3 or OGG",
                "Only mono and stereo audio is supported",
            ],
            WmError::CorruptInput { .. } => vec![
                "Check that the file extension matches its contents",
                "The file may be truncated - try re-exporting from source",
            ],
            WmError::AudioTooShort { .. } => vec![
                "Use a longer recording",
                "The neural method needs less audio than the perceptual method",
            ],
            WmError::InvalidParameter { .. } => {
                vec!["Check the parameter against the manipulation's accepted range"]
            }
            WmError::NotFound { .. } => vec!["List assets to find a valid id"],
            WmError::InternalProcessingFailure { .. } => {
                vec!["Report the failure with the input that triggered it"]
            }
            WmError::Io(_) => vec![
                "Check that the storage directory is writable",
                "Check available disk space",
            ],
            WmError::Serialization(_) => {
                vec!["The catalog manifest may be damaged - restore it from backup"]
            }
        }
    }

    /// Build the structured error returned to callers
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl From<hound::Error> for WmError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => WmError::Io(e),
            hound::Error::Unsupported => WmError::UnsupportedFormat {
                format: "WAV variant not supported by decoder".to_string(),
            },
            other => WmError::CorruptInput {
                reason: format!("Invalid WAV data: {}", other),
                source: Some(Box::new(other)),
            },
        }
    }
}
