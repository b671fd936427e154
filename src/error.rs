//! Error types for result store and lock operations.
//!
//! Provides [`StoreError`], the error surfaced to the task engine. Low-level
//! adapter failures ([`BackendError`]) and codec failures are mapped into it at
//! the store boundary.

use crate::backend::BackendError;

/// Errors that can occur during store and lock operations.
///
/// Lock contention is not an error: a lost [`acquire`](crate::TaskLock::acquire)
/// race returns `Ok(false)`.
///
/// # Examples
///
/// ```
/// use memo_store::StoreError;
///
/// let err = StoreError::NotFound {
///     key: "taskA".to_string(),
/// };
/// assert!(err.to_string().contains("taskA"));
/// assert!(!err.is_unavailable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend connection could not be established, was lost
    /// mid-operation, or the store has been closed.
    #[error("backend unavailable: {message}")]
    BackendUnavailable {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No result record exists for the key.
    #[error("no result stored for key {key}")]
    NotFound {
        /// The task key that was looked up.
        key: String,
    },

    /// A stored record exists but its bytes cannot be decoded.
    #[error("corrupt record at {key}: {message}")]
    Corrupt {
        /// The backend key holding the undecodable bytes.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// No backend client is available for the configured backend.
    #[error("backend not available: {message}")]
    ConfigurationMissing {
        /// Which backend was requested and why it cannot be used.
        message: String,
    },

    /// An isolation prefix would overlap another store's key range.
    #[error("invalid key prefix '{prefix}': {message}")]
    InvalidPrefix {
        /// The rejected prefix.
        prefix: String,
        /// Why it was rejected.
        message: String,
    },

    /// The value passed to `dump` cannot be encoded.
    #[error("cannot encode value for key {key}: {message}")]
    Encode {
        /// The task key being written.
        key: String,
        /// Encoder message.
        message: String,
    },

    /// The backend rejected a command.
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable description of the error.
        message: String,
    },
}

impl StoreError {
    /// Returns `true` for transport-level failures the caller may retry.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Returns `true` if this is a [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Connection { message, source } => {
                Self::BackendUnavailable { message, source }
            },
            BackendError::Closed => Self::BackendUnavailable {
                message: "connection closed".to_string(),
                source: None,
            },
            BackendError::Command { key, message, .. } => Self::Backend {
                message: format!("{key}: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = StoreError::NotFound {
            key: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "no result stored for key abc");

        let err = StoreError::Corrupt {
            key: "result:abc".to_string(),
            message: "expected value".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt record at result:abc: expected value"
        );

        let err = StoreError::ConfigurationMissing {
            message: "redis support not compiled in".to_string(),
        };
        assert!(err.to_string().contains("redis support"));
    }

    #[test]
    fn closed_backend_maps_to_unavailable() {
        let err = StoreError::from(BackendError::Closed);
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("connection closed"));
    }

    #[test]
    fn connection_error_keeps_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::from(BackendError::Connection {
            message: "connect failed".to_string(),
            source: Some(Box::new(inner)),
        });
        assert!(err.is_unavailable());
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("refused"));
    }

    #[test]
    fn command_error_maps_to_backend() {
        let err = StoreError::from(BackendError::Command {
            key: "lock:t".to_string(),
            message: "WRONGTYPE".to_string(),
            source: None,
        });
        assert!(matches!(err, StoreError::Backend { .. }));
        assert!(!err.is_unavailable());
        assert!(err.to_string().contains("lock:t"));
    }

    #[test]
    fn not_found_predicate() {
        let err = StoreError::NotFound {
            key: "k".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!StoreError::from(BackendError::Closed).is_not_found());
    }
}
