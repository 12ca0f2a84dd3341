//! Error types for the core domain

use thiserror::Error;

/// Core error type for domain operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("State transition error: {message}")]
    StateTransition { message: String },

    #[error("Precondition failed: {operation} - {message}")]
    Precondition { operation: String, message: String },

    #[error("Version conflict on {entity_type} {id}: expected version {expected}")]
    VersionConflict {
        entity_type: String,
        id: String,
        expected: i64,
    },

    #[error("Budget exceeded: spent {spent:.4} of {ceiling:.4}, next call estimated at {requested:.4}")]
    BudgetExceeded {
        spent: f64,
        ceiling: f64,
        requested: f64,
    },

    #[error("Operation timeout: {operation} exceeded {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Backend error: {backend} - {message}")]
    Backend { backend: String, message: String },

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Self {
        Error::Validation {
            message: format!("invalid id: {}", err),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl Error {
    /// Create a validation error with a formatted message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific entity type and ID
    pub fn not_found<S1: Into<String>, S2: Into<String>>(entity_type: S1, id: S2) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a state transition error
    pub fn state_transition<S: Into<String>>(message: S) -> Self {
        Self::StateTransition {
            message: message.into(),
        }
    }

    /// Create a precondition failure for an operation
    pub fn precondition<S1: Into<String>, S2: Into<String>>(operation: S1, message: S2) -> Self {
        Self::Precondition {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a version conflict error
    pub fn version_conflict<S1: Into<String>, S2: Into<String>>(
        entity_type: S1,
        id: S2,
        expected: i64,
    ) -> Self {
        Self::VersionConflict {
            entity_type: entity_type.into(),
            id: id.into(),
            expected,
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create a backend error
    pub fn backend<S1: Into<String>, S2: Into<String>>(backend: S1, message: S2) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if this error is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Transient failures are eligible for the single stage retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Backend { .. })
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::NotFound { .. } => "not_found",
            Error::StateTransition { .. } => "state_transition",
            Error::Precondition { .. } => "precondition",
            Error::VersionConflict { .. } => "version_conflict",
            Error::BudgetExceeded { .. } => "budget_exceeded",
            Error::Timeout { .. } => "timeout",
            Error::Backend { .. } => "backend",
            Error::Cancelled(_) => "cancelled",
            Error::Configuration { .. } => "configuration",
            Error::Persistence(_) => "persistence",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let validation_err = Error::validation("Test validation error");
        assert!(validation_err.is_validation());
        assert!(!validation_err.is_not_found());
        assert_eq!(validation_err.category(), "validation");

        let not_found_err = Error::not_found("ContentTask", "123");
        assert!(not_found_err.is_not_found());
        assert_eq!(not_found_err.category(), "not_found");

        let conflict = Error::version_conflict("ContentTask", "123", 4);
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::timeout("generate", 30).is_transient());
        assert!(Error::backend("primary", "connection reset").is_transient());
        assert!(!Error::validation("bad input").is_transient());
        assert!(!Error::precondition("decide", "not awaiting approval").is_transient());

        let budget = Error::BudgetExceeded {
            spent: 0.8,
            ceiling: 1.0,
            requested: 0.4,
        };
        assert!(!budget.is_transient());
        assert_eq!(budget.category(), "budget_exceeded");
    }

    #[test]
    fn test_error_from_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let core_err: Error = json_err.into();
        assert_eq!(core_err.category(), "serialization");

        let uuid_err = uuid::Uuid::parse_str("invalid-uuid").unwrap_err();
        let core_err: Error = uuid_err.into();
        assert!(core_err.is_validation());
    }

    #[test]
    fn test_error_display() {
        let err = Error::precondition("decide", "task is in drafting");
        let display_str = format!("{}", err);
        assert!(display_str.contains("Precondition failed"));
        assert!(display_str.contains("decide"));
        assert!(display_str.contains("drafting"));
    }
}
