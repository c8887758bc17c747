//! Error types for docwire

use thiserror::Error;

/// Result type alias for docwire operations
pub type Result<T> = std::result::Result<T, DocwireError>;

/// A field name rejected by a field-name validator.
///
/// Carries the offending name, the nesting depth it was found at (0 is the
/// top level of the document) and a human-readable reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid field name '{name}' at depth {depth}: {reason}")]
pub struct InvalidFieldNameError {
    pub name: String,
    pub depth: usize,
    pub reason: String,
}

impl InvalidFieldNameError {
    pub fn new(name: impl Into<String>, depth: usize, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depth,
            reason: reason.into(),
        }
    }
}

/// Unified error type for all docwire operations
#[derive(Error, Debug, Clone)]
pub enum DocwireError {
    /// A document key failed field-name validation; the write was not encoded
    #[error(transparent)]
    InvalidFieldName(#[from] InvalidFieldNameError),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Batch fetch or cursor kill failed in the network/command layer
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DocwireError {
    /// Returns true if the caller may reasonably retry the operation.
    ///
    /// The cursor itself never retries; this is a hint for the layer above it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocwireError::Transport(_) | DocwireError::Timeout(_))
    }

    /// Returns true if this error was produced by a cancellation signal
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DocwireError::Cancelled(_))
    }

    /// Returns true if the error came from write validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DocwireError::InvalidFieldName(_) | DocwireError::Validation(_)
        )
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for DocwireError {
    fn from(err: mongodb::error::Error) -> Self {
        DocwireError::Transport(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for DocwireError {
    fn from(err: bson::ser::Error) -> Self {
        DocwireError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for DocwireError {
    fn from(err: bson::de::Error) -> Self {
        DocwireError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::document::ValueAccessError> for DocwireError {
    fn from(err: bson::document::ValueAccessError) -> Self {
        DocwireError::Deserialization(format!("Malformed command reply: {}", err))
    }
}
