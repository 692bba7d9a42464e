//! Validation Utilities

use thiserror::Error;

/// Validation error types
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Field required: {0}")]
    Required(String),
}

/// Validate a partition or source ID
///
/// Valid IDs are:
/// - 1-128 characters
/// - Lowercase alphanumeric with hyphens and underscores
/// - Must start with a letter
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    let Some(first) = id.chars().next() else {
        return Err(ValidationError::Required("ID cannot be empty".into()));
    };

    if id.len() > 128 {
        return Err(ValidationError::InvalidId(
            "ID must be 128 characters or less".into(),
        ));
    }

    if !first.is_ascii_lowercase() {
        return Err(ValidationError::InvalidId(
            "ID must start with a lowercase letter".into(),
        ));
    }

    for (i, c) in id.chars().enumerate() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '_' {
            return Err(ValidationError::InvalidId(format!(
                "Invalid character '{}' at position {}",
                c, i
            )));
        }
    }

    // Cannot end with hyphen or underscore
    if id.ends_with('-') || id.ends_with('_') {
        return Err(ValidationError::InvalidId(
            "ID cannot end with hyphen or underscore".into(),
        ));
    }

    Ok(())
}

/// Validate an owner ID: non-empty, no surrounding whitespace
pub fn validate_owner(owner_id: &str) -> Result<(), ValidationError> {
    if owner_id.is_empty() {
        return Err(ValidationError::Required("owner_id".into()));
    }
    if owner_id.trim() != owner_id || owner_id.len() > 256 {
        return Err(ValidationError::InvalidId(format!(
            "owner_id '{}' is not a valid owner",
            owner_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_valid() {
        assert!(validate_id("p1").is_ok());
        assert!(validate_id("user-partition").is_ok());
        assert!(validate_id("fast_tier").is_ok());
        assert!(validate_id("a").is_ok());
    }

    #[test]
    fn test_validate_id_invalid() {
        assert!(validate_id("").is_err());
        assert!(validate_id("123test").is_err()); // Starts with number
        assert!(validate_id("Test").is_err()); // Uppercase
        assert!(validate_id("test-").is_err()); // Ends with hyphen
        assert!(validate_id("test ext").is_err()); // Space
    }

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner("user-1").is_ok());
        assert!(validate_owner("User@Example.com").is_ok());
        assert!(validate_owner("").is_err());
        assert!(validate_owner(" padded ").is_err());
    }
}
