//! Schema creation
//!
//! Tables are created idempotently at startup, so opening an existing
//! database is safe.

use crate::{Error, Result};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations");

    create_content_tasks_table(pool).await?;
    create_stage_history_table(pool).await?;
    create_training_examples_table(pool).await?;
    create_dataset_snapshots_table(pool).await?;

    info!("Database migrations completed successfully");
    Ok(())
}

async fn execute(pool: &SqlitePool, table: &str, sql: &str) -> Result<()> {
    sqlx::query(sql)
        .execute(pool)
        .await
        .map_err(|e| Error::Migration(format!("{}: {}", table, e)))?;
    Ok(())
}

async fn create_content_tasks_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating content_tasks table");
    execute(
        pool,
        "content_tasks",
        r#"
        CREATE TABLE IF NOT EXISTS content_tasks (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN (
                'created', 'researching', 'drafting', 'qa_review', 'refining',
                'asset_selection', 'formatting', 'awaiting_approval', 'publishing',
                'published', 'rejected', 'failed_quality', 'failed_error'
            )),
            approval_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (approval_status IN ('pending', 'approved', 'rejected')),
            quality_score REAL,
            refinement_count INTEGER NOT NULL DEFAULT 0,
            cost_accumulated REAL NOT NULL DEFAULT 0,
            failure_code TEXT,
            record TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        )
    "#,
    )
    .await?;
    execute(
        pool,
        "content_tasks",
        "CREATE INDEX IF NOT EXISTS idx_content_tasks_status ON content_tasks(status)",
    )
    .await?;
    execute(
        pool,
        "content_tasks",
        "CREATE INDEX IF NOT EXISTS idx_content_tasks_created_at ON content_tasks(created_at)",
    )
    .await
}

async fn create_stage_history_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating stage_history table");
    execute(
        pool,
        "stage_history",
        r#"
        CREATE TABLE IF NOT EXISTS stage_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            status TEXT NOT NULL,
            backend_id TEXT,
            attempt INTEGER NOT NULL DEFAULT 1,
            output_digest TEXT,
            cost REAL NOT NULL DEFAULT 0,
            note TEXT,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY (task_id) REFERENCES content_tasks(id) ON DELETE CASCADE
        )
    "#,
    )
    .await?;
    execute(
        pool,
        "stage_history",
        "CREATE INDEX IF NOT EXISTS idx_stage_history_task ON stage_history(task_id, id)",
    )
    .await
}

async fn create_training_examples_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating training_examples table");
    execute(
        pool,
        "training_examples",
        r#"
        CREATE TABLE IF NOT EXISTS training_examples (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL UNIQUE,
            topic TEXT NOT NULL,
            final_status TEXT NOT NULL,
            success INTEGER NOT NULL,
            final_score REAL,
            tags TEXT NOT NULL DEFAULT '[]',
            record TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
    "#,
    )
    .await?;
    execute(
        pool,
        "training_examples",
        "CREATE INDEX IF NOT EXISTS idx_training_examples_status ON training_examples(final_status, success)",
    )
    .await
}

async fn create_dataset_snapshots_table(pool: &SqlitePool) -> Result<()> {
    debug!("Creating dataset_snapshots table");
    execute(
        pool,
        "dataset_snapshots",
        r#"
        CREATE TABLE IF NOT EXISTS dataset_snapshots (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            filter TEXT NOT NULL,
            digest TEXT NOT NULL,
            example_count INTEGER NOT NULL,
            examples TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
    "#,
    )
    .await
}
