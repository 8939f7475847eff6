//! Errors raised by the PostgreSQL audit store.

use concierge_audit::AuditError;

#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::error::Error),

    /// The `[storage.postgres]` section was rejected before connecting.
    #[error("Invalid storage.postgres configuration: {message}")]
    Config { message: String },
}

impl PostgresError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// Everything the store reports to the audit layer is a persistence failure
impl From<PostgresError> for AuditError {
    fn from(err: PostgresError) -> Self {
        AuditError::persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PostgresError>;
