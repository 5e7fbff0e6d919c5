//! Artifact name validation.

use kiln_core::{Error, Result};

/// Longest accepted artifact name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Check that `name` is usable as a single path segment.
///
/// Names may not start with `.`; that prefix is reserved for staging files.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control());

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArtifactName(name.to_string()))
    }
}
