//! Error types for prompt rendering

use thiserror::Error;

/// Prompt rendering error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Core domain error: {0}")]
    Core(#[from] content_forge_core::Error),

    #[error("Template variable missing: {name}")]
    MissingVariable { name: String },

    #[error("Invalid template syntax: {0}")]
    InvalidTemplate(String),

    #[error("Prompt not found: {name}")]
    PromptNotFound { name: String },

    #[error("Failed to read prompt override {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for prompt operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for content_forge_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(inner) => inner,
            Error::Io { .. } => content_forge_core::Error::configuration(err.to_string()),
            other => content_forge_core::Error::Internal(other.to_string()),
        }
    }
}
