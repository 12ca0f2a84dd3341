//! Storage manager for coordinating database operations

use crate::repositories::{SqliteTaskStore, SqliteTrainingStore};
use crate::{schema, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub type DbPool = Pool<Sqlite>;

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    pub migrate_on_startup: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:.content-forge/content-forge.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 5,
            migrate_on_startup: true,
        }
    }
}

impl DatabaseConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Create the parent directory of a file-backed database
fn ensure_parent_directory(database_url: &str) -> Result<()> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    if path.starts_with(":memory:") || path.is_empty() {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
            info!("Created database directory: {}", parent.display());
        }
    }
    Ok(())
}

/// Open a pool with foreign keys, WAL journaling and a busy timeout
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    info!("Connecting to SQLite database");
    ensure_parent_directory(&config.url)?;

    let connect_opts = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(connect_opts)
        .await?;
    Ok(pool)
}

/// Main storage manager coordinating all repositories
pub struct StorageManager {
    pool: DbPool,
    tasks: Arc<SqliteTaskStore>,
    training: Arc<SqliteTrainingStore>,
}

impl StorageManager {
    /// Connect and, if configured, run migrations
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        info!("Database connection established");

        let manager = Self::from_pool(pool);
        if config.migrate_on_startup {
            manager.migrate().await?;
        }
        Ok(manager)
    }

    pub fn from_pool(pool: DbPool) -> Self {
        let tasks = Arc::new(SqliteTaskStore::new(pool.clone()));
        let training = Arc::new(SqliteTrainingStore::new(pool.clone()));
        Self {
            pool,
            tasks,
            training,
        }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        schema::run_migrations(&self.pool).await
    }

    /// Get the task store
    pub fn tasks(&self) -> Arc<SqliteTaskStore> {
        self.tasks.clone()
    }

    /// Get the training corpus store
    pub fn training(&self) -> Arc<SqliteTrainingStore> {
        self.training.clone()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get database statistics
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM content_tasks) AS tasks_count,
                (SELECT COUNT(*) FROM stage_history) AS history_count,
                (SELECT COUNT(*) FROM training_examples) AS examples_count,
                (SELECT COUNT(*) FROM dataset_snapshots) AS snapshots_count
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            tasks_count: row.try_get("tasks_count")?,
            history_count: row.try_get("history_count")?,
            examples_count: row.try_get("examples_count")?,
            snapshots_count: row.try_get("snapshots_count")?,
        })
    }

    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub tasks_count: i64,
    pub history_count: i64,
    pub examples_count: i64,
    pub snapshots_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_manager_creates_directory_and_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("forge.db");
        let config = DatabaseConfig::new(format!("sqlite://{}", path.display()));

        let manager = StorageManager::new(&config).await.unwrap();
        assert!(path.exists());
        manager.health_check().await.unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.tasks_count, 0);
        assert_eq!(stats.snapshots_count, 0);

        // Migrations are idempotent
        manager.migrate().await.unwrap();
        manager.close().await;
    }
}
