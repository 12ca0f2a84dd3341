//! Persistence layer for Content Forge
//!
//! This crate provides the SQLite implementations of the task store and the
//! training corpus store, plus schema creation and connection management.

pub mod error;
pub mod manager;
pub mod repositories;
pub mod schema;

pub use error::{Error, Result};
pub use manager::{create_pool, DatabaseConfig, DatabaseStats, DbPool, StorageManager};
pub use repositories::{SqliteTaskStore, SqliteTrainingStore};

/// Re-export core types for convenience
pub use content_forge_core as core;
