//! Error types for the audit layer.

/// Errors that can occur in the audit service.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Caller supplied an invalid event or query.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store rejected or failed a write or read.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The store holds as many records as it is allowed to.
    #[error("Audit store is full ({limit} records)")]
    Saturated { limit: usize },

    /// The store does not implement the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl AuditError {
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    #[must_use]
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    #[must_use]
    pub fn saturated(limit: usize) -> Self {
        Self::Saturated { limit }
    }

    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported(operation.into())
    }

    /// Returns true for caller errors (as opposed to store failures).
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

/// Result type alias for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
