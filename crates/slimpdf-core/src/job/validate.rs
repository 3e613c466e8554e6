//! Local input validation.
//!
//! Runs before any compute dispatch; failures here never reach the channel
//! and are never retried.

use crate::config::Limits;
use crate::error::{CompressError, CompressResult};

use super::types::InputFile;

/// Validate a candidate file against the configured limits.
///
/// Checks, in order: extension, byte-size ceiling, leading magic bytes.
pub fn validate_file(file: &InputFile, limits: &Limits) -> CompressResult<()> {
    let extension = file
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if !limits.allowed_extensions.iter().any(|e| *e == extension) {
        return Err(CompressError::invalid_file_type(&file.name));
    }

    if file.size() > limits.max_file_size {
        return Err(CompressError::file_too_large(
            file.size(),
            limits.max_file_size,
        ));
    }

    if !file.bytes.starts_with(&limits.magic) {
        return Err(CompressError::corrupted(&file.name));
    }

    Ok(())
}
