//! Task repository with optimistic versioning

use super::{decode_timestamp, encode_timestamp};
use crate::{Error, Result};
use async_trait::async_trait;
use content_forge_core::history::StageHistoryEntry;
use content_forge_core::store::{Pagination, TaskFilter, TaskStore, Versioned};
use content_forge_core::task::ContentTask;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ENTITY: &str = "ContentTask";

/// SQLite-backed [`TaskStore`]
pub struct SqliteTaskStore {
    pool: Pool<Sqlite>,
}

impl SqliteTaskStore {
    /// Create a new task repository
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert a task at version 1; an existing id keeps its stored record
    pub async fn create(&self, task: &ContentTask) -> Result<i64> {
        debug!(task_id = %task.id, "Creating content task");
        let record = serde_json::to_string(task)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO content_tasks (
                id, topic, status, approval_status, quality_score, refinement_count,
                cost_accumulated, failure_code, record, version, created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.input.topic)
        .bind(task.status.as_str())
        .bind(task.approval_status.as_str())
        .bind(task.quality_score)
        .bind(task.refinement_count as i64)
        .bind(task.cost_accumulated)
        .bind(task.failure.as_ref().map(|f| f.code()))
        .bind(record)
        .bind(encode_timestamp(&task.created_at))
        .bind(encode_timestamp(&task.updated_at))
        .bind(task.completed_at.as_ref().map(encode_timestamp))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!(task_id = %task.id, "Task already stored, keeping existing record");
            return Ok(self.find_by_id(task.id).await?.version);
        }

        info!(task_id = %task.id, topic = %task.input.topic, "Created content task");
        Ok(1)
    }

    /// Find a task and the version it was read at
    pub async fn find_by_id(&self, id: Uuid) -> Result<Versioned<ContentTask>> {
        let row = sqlx::query("SELECT record, version FROM content_tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(ENTITY, id.to_string()))?;
        self.row_to_versioned(&row)
    }

    /// Write the task if the stored version still matches
    pub async fn save(&self, task: &ContentTask, expected_version: i64) -> Result<i64> {
        let record = serde_json::to_string(task)?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE content_tasks
            SET status = ?, approval_status = ?, quality_score = ?, refinement_count = ?,
                cost_accumulated = ?, failure_code = ?, record = ?, updated_at = ?,
                completed_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.approval_status.as_str())
        .bind(task.quality_score)
        .bind(task.refinement_count as i64)
        .bind(task.cost_accumulated)
        .bind(task.failure.as_ref().map(|f| f.code()))
        .bind(record)
        .bind(encode_timestamp(&task.updated_at))
        .bind(task.completed_at.as_ref().map(encode_timestamp))
        .bind(task.id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let exists = sqlx::query("SELECT 1 FROM content_tasks WHERE id = ?")
                .bind(task.id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if !exists {
                return Err(Error::not_found(ENTITY, task.id.to_string()));
            }
            warn!(
                task_id = %task.id,
                expected_version,
                "Optimistic version check failed"
            );
            return Err(Error::Conflict {
                entity: ENTITY.to_string(),
                id: task.id.to_string(),
                expected: expected_version,
            });
        }

        debug!(task_id = %task.id, status = %task.status, version = expected_version + 1, "Saved content task");
        Ok(expected_version + 1)
    }

    /// Tasks matching the filter, newest first
    pub async fn search(&self, filter: &TaskFilter, page: Pagination) -> Result<Vec<ContentTask>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT record, version FROM content_tasks WHERE 1 = 1");

        if !filter.statuses.is_empty() {
            query.push(" AND status IN (");
            let mut separated = query.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(topic) = &filter.topic_contains {
            query
                .push(" AND topic LIKE ")
                .push_bind(format!("%{}%", escape_like(topic)))
                .push(" ESCAPE '\\'");
        }
        if let Some(after) = &filter.created_after {
            query
                .push(" AND created_at > ")
                .push_bind(encode_timestamp(after));
        }
        let order = if filter.oldest_first { "ASC" } else { "DESC" };
        query
            .push(format!(" ORDER BY created_at {}, id LIMIT ", order))
            .push_bind(page.limit as i64)
            .push(" OFFSET ")
            .push_bind(page.offset as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| self.row_to_versioned(row).map(Versioned::into_inner))
            .collect()
    }

    /// Append one stage history entry
    pub async fn record_stage(&self, entry: &StageHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stage_history (
                task_id, stage, status, backend_id, attempt, output_digest, cost, note, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.task_id.to_string())
        .bind(entry.stage.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.backend_id)
        .bind(entry.attempt as i64)
        .bind(&entry.output_digest)
        .bind(entry.cost)
        .bind(&entry.note)
        .bind(encode_timestamp(&entry.recorded_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Error::not_found(ENTITY, entry.task_id.to_string())
            }
            _ => Error::Database(e),
        })?;

        debug!(
            task_id = %entry.task_id,
            stage = %entry.stage,
            status = %entry.status,
            "Recorded stage history"
        );
        Ok(())
    }

    /// History of one task in insertion order
    pub async fn stage_history(&self, task_id: Uuid) -> Result<Vec<StageHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, stage, status, backend_id, attempt, output_digest, cost, note, recorded_at
            FROM stage_history WHERE task_id = ? ORDER BY id ASC
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_history(row)).collect()
    }

    /// Count stored tasks
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM content_tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    fn row_to_versioned(&self, row: &SqliteRow) -> Result<Versioned<ContentTask>> {
        let record: String = row.try_get("record")?;
        let version: i64 = row.try_get("version")?;
        let task: ContentTask = serde_json::from_str(&record)?;
        Ok(Versioned::new(task, version))
    }

    fn row_to_history(&self, row: &SqliteRow) -> Result<StageHistoryEntry> {
        let task_id: String = row.try_get("task_id")?;
        let stage: String = row.try_get("stage")?;
        let status: String = row.try_get("status")?;
        let attempt: i64 = row.try_get("attempt")?;
        let recorded_at: String = row.try_get("recorded_at")?;

        Ok(StageHistoryEntry {
            task_id: Uuid::parse_str(&task_id).map_err(content_forge_core::Error::from)?,
            stage: stage.parse()?,
            status: status.parse()?,
            backend_id: row.try_get("backend_id")?,
            attempt: attempt as u32,
            output_digest: row.try_get("output_digest")?,
            cost: row.try_get("cost")?,
            note: row.try_get("note")?,
            recorded_at: decode_timestamp(&recorded_at)?,
        })
    }
}

/// Escape LIKE wildcards so user text matches literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &ContentTask) -> content_forge_core::Result<i64> {
        Ok(self.create(task).await?)
    }

    async fn get(&self, id: Uuid) -> content_forge_core::Result<Versioned<ContentTask>> {
        Ok(self.find_by_id(id).await?)
    }

    async fn update(
        &self,
        task: &ContentTask,
        expected_version: i64,
    ) -> content_forge_core::Result<i64> {
        Ok(self.save(task, expected_version).await?)
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        page: Pagination,
    ) -> content_forge_core::Result<Vec<ContentTask>> {
        Ok(self.search(filter, page).await?)
    }

    async fn append_history(&self, entry: &StageHistoryEntry) -> content_forge_core::Result<()> {
        Ok(self.record_stage(entry).await?)
    }

    async fn history(&self, task_id: Uuid) -> content_forge_core::Result<Vec<StageHistoryEntry>> {
        Ok(self.stage_history(task_id).await?)
    }
}
