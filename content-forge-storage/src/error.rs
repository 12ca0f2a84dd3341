//! Error types for storage operations

use thiserror::Error;

/// Storage layer error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core domain error: {0}")]
    Core(#[from] content_forge_core::Error),

    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Conflict: {entity} {id} is no longer at version {expected}")]
    Conflict {
        entity: String,
        id: String,
        expected: i64,
    },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_found<S: Into<String>>(entity: &str, id: S) -> Self {
        Error::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    /// Map unique-constraint failures to a constraint violation
    pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::ConstraintViolation(format!("{} already exists", what))
            }
            _ => Error::Database(err),
        }
    }
}

impl From<Error> for content_forge_core::Error {
    fn from(err: Error) -> Self {
        use content_forge_core::Error as CoreError;
        match err {
            Error::Core(inner) => inner,
            Error::NotFound { entity, id } => CoreError::not_found(entity, id),
            Error::Conflict {
                entity,
                id,
                expected,
            } => CoreError::version_conflict(entity, id, expected),
            Error::ConstraintViolation(message) => CoreError::validation(message),
            Error::Serialization(e) => CoreError::Serialization(e.to_string()),
            Error::Database(e) => CoreError::Persistence(e.to_string()),
            Error::Migration(message) => CoreError::Persistence(message),
            Error::Internal(e) => CoreError::Internal(e.to_string()),
        }
    }
}
