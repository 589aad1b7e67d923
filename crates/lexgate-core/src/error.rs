use thiserror::Error;

/// Core error types shared by the admission and caching layers
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid rate policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid result kind: {0}")]
    InvalidResultKind(String),

    #[error("Invariant violation for entity {entity_id}: {message}")]
    InvariantViolation { entity_id: String, message: String },
}

impl CoreError {
    /// Create a new InvalidPolicy error
    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy(message.into())
    }

    /// Create a new InvalidResultKind error
    pub fn invalid_result_kind(kind: impl Into<String>) -> Self {
        Self::InvalidResultKind(kind.into())
    }

    /// Create a new InvariantViolation error
    pub fn invariant_violation(entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }

    /// Check if this error is caused by caller-supplied configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidPolicy(_) | Self::InvalidResultKind(_))
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidPolicy(_) | Self::InvalidResultKind(_) => ErrorCategory::Configuration,
            Self::InvariantViolation { .. } => ErrorCategory::Invariant,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Invariant,
    Serialization,
    Store,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Invariant => "invariant",
            Self::Serialization => "serialization",
            Self::Store => "store",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = CoreError::invalid_policy("max_requests must be > 0");
        assert!(matches!(err, CoreError::InvalidPolicy(_)));
        assert_eq!(err.to_string(), "Invalid rate policy: max_requests must be > 0");

        let err = CoreError::invariant_violation("text-1", "derived before created");
        assert_eq!(
            err.to_string(),
            "Invariant violation for entity text-1: derived before created"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            CoreError::invalid_result_kind("").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            CoreError::invariant_violation("e", "m").category(),
            ErrorCategory::Invariant
        );
        assert!(CoreError::invalid_policy("x").is_configuration_error());
        assert!(!CoreError::invariant_violation("e", "m").is_configuration_error());
    }
}
