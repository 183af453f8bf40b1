//! Libris Error - Unified Error Types
//!
//! Error handling for every Libris operation. Errors are grouped by where
//! they originate (parsing, evaluation, collection management, indexing,
//! configuration) so callers can tell user mistakes from system faults.
//!
//! A query or update that matches nothing is never an error; those report
//! zero counts instead.
//!
//! @version 0.1.0
//! @author Libris Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Libris operations.
#[derive(Error, Debug)]
pub enum LibrisError {
    // Request errors
    #[error("parse error: {0}")]
    Parse(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("execution error: {0}")]
    Execution(String),

    // Collection errors
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("maximum number of collections reached ({0})")]
    TooManyCollections(usize),

    #[error("document with id {0} already exists")]
    DuplicateId(String),

    #[error("document exceeds maximum size: {size} > {limit} bytes")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("validation failed: {}", .0.join(", "))]
    ValidationFailed(Vec<String>),

    // Index errors
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Libris operations.
pub type Result<T> = std::result::Result<T, LibrisError>;

// =============================================================================
// Error Classification
// =============================================================================

impl LibrisError {
    /// Returns true if this is a user error (vs system error).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            LibrisError::Parse(_)
                | LibrisError::TypeError(_)
                | LibrisError::CollectionNotFound(_)
                | LibrisError::CollectionExists(_)
                | LibrisError::DuplicateId(_)
                | LibrisError::ValidationFailed(_)
                | LibrisError::UniqueViolation(_)
                | LibrisError::IndexNotFound(_)
        )
    }

    /// Returns true if this is a constraint violation error.
    pub fn is_constraint_error(&self) -> bool {
        matches!(
            self,
            LibrisError::DuplicateId(_)
                | LibrisError::ValidationFailed(_)
                | LibrisError::UniqueViolation(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(LibrisError::Parse("bad".into()).is_user_error());
        assert!(LibrisError::UniqueViolation("title_1".into()).is_constraint_error());
        assert!(!LibrisError::Serialization("oops".into()).is_user_error());
    }

    #[test]
    fn test_validation_message() {
        let err = LibrisError::ValidationFailed(vec![
            "Missing required field: title".to_string(),
            "Unknown field: isbn".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: Missing required field: title, Unknown field: isbn"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: LibrisError = io.into();
        assert!(matches!(err, LibrisError::Io(_)));
    }
}
