//! Typed errors surfaced to callers.
//!
//! Each variant serializes with a snake_case `code` field for frontend
//! matching, alongside a short human-readable `message`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the orchestration layer or relayed from the compute unit.
///
/// Validation errors (`InvalidFileType`, `FileTooLarge`) are resolved locally
/// before any channel dispatch and are never retried. `StaleComputeChannel`
/// is retried with backoff before being escalated. Everything else is
/// terminal for the job that produced it but never corrupts the slot.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CompressError {
    #[error("{message}")]
    InvalidFileType { message: String },

    #[error("{message}")]
    FileTooLarge { message: String },

    #[error("{message}")]
    EncryptedInput { message: String },

    #[error("{message}")]
    CorruptedInput { message: String },

    #[error("{message}")]
    ProcessingFailed { message: String },

    #[error("{message}")]
    ComputeChannelError { message: String },

    #[error("{message}")]
    StaleComputeChannel { message: String },
}

impl CompressError {
    pub fn invalid_file_type(name: &str) -> Self {
        Self::InvalidFileType {
            message: format!("'{}' is not a PDF document", name),
        }
    }

    pub fn file_too_large(size: u64, max: u64) -> Self {
        Self::FileTooLarge {
            message: format!(
                "File is {} bytes, which exceeds the {} byte limit",
                size, max
            ),
        }
    }

    pub fn encrypted() -> Self {
        Self::EncryptedInput {
            message: "Document is password-protected".to_string(),
        }
    }

    pub fn corrupted(name: &str) -> Self {
        Self::CorruptedInput {
            message: format!("'{}' does not look like a valid PDF document", name),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingFailed {
            message: message.into(),
        }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::ComputeChannelError {
            message: message.into(),
        }
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::StaleComputeChannel {
            message: message.into(),
        }
    }

    /// Fatal stale error surfaced after retries are exhausted.
    pub fn stale_reload_required() -> Self {
        Self::StaleComputeChannel {
            message: "A newer version of the app is available. Please reload.".to_string(),
        }
    }

    /// True for the transient-staleness signature that warrants a retry.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleComputeChannel { .. })
    }
}

/// Result type alias used throughout the crate.
pub type CompressResult<T> = Result<T, CompressError>;
