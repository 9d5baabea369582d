//! Error types for the `ohlcv-rag` crate.

use thiserror::Error;

/// The three error families callers can match on regardless of the
/// active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid construction or validation input. Never silently defaulted.
    Configuration,
    /// A backend or embedding call failed.
    Operation,
    /// The active backend cannot perform the requested operation.
    Capability,
}

/// Errors that can occur in vector store and retrieval operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The requested store type is not registered.
    #[error("Unknown vector store '{store_type}'. Available: {}", available.join(", "))]
    UnknownStore {
        /// The key the caller asked for.
        store_type: String,
        /// Registered store keys.
        available: Vec<String>,
    },

    /// A native backend call failed.
    #[error("{operation} failed ({backend}): {message}")]
    OperationError {
        /// The adapter operation that failed, e.g. `search`.
        operation: String,
        /// The backend key of the adapter, e.g. `qdrant`.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The backend cannot perform the operation, natively or emulated.
    #[error("{backend} does not support {operation}: {reason}")]
    CapabilityError {
        /// The adapter operation that was requested.
        operation: String,
        /// The backend key of the adapter.
        backend: String,
        /// Why the operation is unavailable.
        reason: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A filter expression could not be parsed.
    #[error("Invalid filter: {0}")]
    FilterError(String),
}

impl RagError {
    /// Build an [`RagError::OperationError`] from any displayable cause.
    pub fn operation(
        operation: impl Into<String>,
        backend: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::OperationError {
            operation: operation.into(),
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Build an [`RagError::CapabilityError`].
    pub fn capability(
        operation: impl Into<String>,
        backend: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CapabilityError {
            operation: operation.into(),
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error into one of the three caller-facing families.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError(_) | Self::UnknownStore { .. } | Self::FilterError(_) => {
                ErrorKind::Configuration
            }
            Self::OperationError { .. } | Self::EmbeddingError { .. } => ErrorKind::Operation,
            Self::CapabilityError { .. } => ErrorKind::Capability,
        }
    }

    /// Rewrap an error raised inside an adapter so it carries the
    /// operation and backend. Errors that already carry context, and
    /// configuration errors, pass through unchanged.
    pub(crate) fn in_operation(self, operation: &str, backend: &str) -> Self {
        match self {
            Self::EmbeddingError { provider, message } => Self::OperationError {
                operation: operation.to_string(),
                backend: backend.to_string(),
                message: format!("embedding failed ({provider}): {message}"),
            },
            other => other,
        }
    }
}

/// A convenience result type for vector store and retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
