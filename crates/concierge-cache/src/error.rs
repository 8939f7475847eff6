//! Error types for the cache layer.

/// Errors that can occur in the cache layer.
///
/// Only [`CacheError::Serialization`] ever reaches callers of the
/// [`CacheFacade`](crate::CacheFacade); remote failures are absorbed by the
/// fallback path.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The remote cache could not be reached or rejected the command.
    #[error("Remote cache unavailable: {message}")]
    RemoteUnavailable {
        /// Description of the remote failure.
        message: String,
    },

    /// A value could not be encoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Creates a new `RemoteUnavailable` error.
    #[must_use]
    pub fn remote_unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
        }
    }

    /// Returns true if this is a remote (infrastructure) failure.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteUnavailable { .. })
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
