//! Store error types.
//!
//! Every variant except `Serialization` means the shared store could not be
//! reached or did not answer in time. Callers decide per operation whether
//! that is absorbed (cache reads and writes) or surfaced (counting paths).

use lexgate_core::ErrorCategory;

/// Errors that can occur during key-value store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Could not obtain a connection to the store.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The store rejected or failed a command.
    #[error("Command {operation} failed: {message}")]
    Command {
        /// Operation that failed.
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The operation did not complete within its deadline.
    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// The key holds a value of a different type than the operation expects.
    #[error("Wrong type for key {key}: expected {expected}")]
    WrongType {
        /// Offending key.
        key: String,
        /// Expected value type.
        expected: &'static str,
    },

    /// The store answered with something the client could not interpret.
    #[error("Unexpected reply to {operation}: {message}")]
    UnexpectedReply {
        /// Operation whose reply was malformed.
        operation: &'static str,
        /// Description of the reply.
        message: String,
    },

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

impl StoreError {
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn command(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            operation,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(operation: &'static str, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation,
            timeout_ms,
        }
    }

    #[must_use]
    pub fn wrong_type(key: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            key: key.into(),
            expected,
        }
    }

    #[must_use]
    pub fn unexpected_reply(operation: &'static str, message: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            operation,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if the store itself is unreachable or unresponsive.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Command { .. } | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Serialization { .. } => ErrorCategory::Serialization,
            _ => ErrorCategory::Store,
        }
    }
}

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;
