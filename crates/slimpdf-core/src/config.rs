//! Externally configurable constants.
//!
//! None of these values are core logic; callers may override them to match
//! their deployment (e.g. a smaller size ceiling on mobile).

use std::time::Duration;

/// Reference ceiling for accepted input files: 200 MB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;

/// Magic bytes identifying the accepted document format.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Validation limits applied before any compute dispatch.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum accepted file size in bytes.
    pub max_file_size: u64,
    /// Required leading magic bytes.
    pub magic: Vec<u8>,
    /// Accepted file extensions (lowercase, without the dot).
    pub allowed_extensions: Vec<String>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            magic: PDF_MAGIC.to_vec(),
            allowed_extensions: vec!["pdf".to_string()],
        }
    }
}

/// Retry policy for stale compute channel recovery.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum connect attempts before escalating to a fatal error.
    pub max_attempts: u32,
    /// Base backoff; attempt N waits `backoff * N`.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Tunables for the single-slot job controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Settling delay before a settings change triggers a recompute.
    pub debounce: Duration,
    /// Stale channel retry policy.
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            retry: RetryConfig::default(),
        }
    }
}
