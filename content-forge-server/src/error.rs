//! Error types for the command-line application

use thiserror::Error;

/// Application error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] content_forge_storage::Error),

    #[error("Prompt error: {0}")]
    Prompts(#[from] content_forge_prompts::Error),

    #[error("{0}")]
    Core(#[from] content_forge_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for application operations
pub type Result<T> = std::result::Result<T, Error>;
