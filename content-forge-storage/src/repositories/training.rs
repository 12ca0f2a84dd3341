//! Training corpus repository

use super::{decode_timestamp, encode_timestamp};
use crate::{Error, Result};
use async_trait::async_trait;
use content_forge_core::store::TrainingStore;
use content_forge_core::training::{
    CorpusStats, DatasetSnapshot, ExampleFilter, SnapshotSummary, TagMode, TrainingExample,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

const EXAMPLE: &str = "TrainingExample";
const SNAPSHOT: &str = "DatasetSnapshot";

/// SQLite-backed [`TrainingStore`]
///
/// The example record is written once; only the `tags` column changes later.
pub struct SqliteTrainingStore {
    pool: Pool<Sqlite>,
}

impl SqliteTrainingStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert an example; false when the task already has one
    pub async fn create_example(&self, example: &TrainingExample) -> Result<bool> {
        let record = serde_json::to_string(example)?;
        let tags = serde_json::to_string(&example.tags)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO training_examples (
                id, task_id, topic, final_status, success, final_score, tags, record, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO NOTHING
            "#,
        )
        .bind(example.id.to_string())
        .bind(example.task_id.to_string())
        .bind(&example.input.topic)
        .bind(example.final_status.as_str())
        .bind(example.success)
        .bind(example.final_score)
        .bind(tags)
        .bind(record)
        .bind(encode_timestamp(&example.created_at))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!(task_id = %example.task_id, "Training example already captured");
            return Ok(false);
        }
        info!(
            example_id = %example.id,
            task_id = %example.task_id,
            status = %example.final_status,
            "Captured training example"
        );
        Ok(true)
    }

    pub async fn find_example(&self, id: Uuid) -> Result<TrainingExample> {
        let row = sqlx::query("SELECT record, tags FROM training_examples WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(EXAMPLE, id.to_string()))?;
        self.row_to_example(&row)
    }

    pub async fn find_by_task(&self, task_id: Uuid) -> Result<Option<TrainingExample>> {
        let row = sqlx::query("SELECT record, tags FROM training_examples WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| self.row_to_example(&row)).transpose()
    }

    /// Examples matching the filter, oldest first
    ///
    /// Scalar criteria are pushed into SQL; tag and topic criteria are applied
    /// to the decoded rows.
    pub async fn search(&self, filter: &ExampleFilter) -> Result<Vec<TrainingExample>> {
        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT record, tags FROM training_examples WHERE 1 = 1");
        if let Some(success) = filter.success {
            query.push(" AND success = ").push_bind(success);
        }
        if let Some(status) = filter.status {
            query.push(" AND final_status = ").push_bind(status.as_str());
        }
        if let Some(min) = filter.min_score {
            query.push(" AND final_score >= ").push_bind(min);
        }
        if let Some(after) = &filter.created_after {
            query
                .push(" AND created_at > ")
                .push_bind(encode_timestamp(after));
        }
        query.push(" ORDER BY created_at ASC, id ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut examples = Vec::with_capacity(rows.len());
        for row in &rows {
            let example = self.row_to_example(row)?;
            if filter.matches(&example) {
                examples.push(example);
            }
        }
        debug!(matched = examples.len(), scanned = rows.len(), "Filtered training corpus");
        Ok(examples)
    }

    /// Add or remove tags atomically across examples; returns how many changed
    pub async fn set_tags(&self, ids: &[Uuid], tags: &[String], mode: TagMode) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;

        for id in ids {
            let row = sqlx::query("SELECT tags FROM training_examples WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::not_found(EXAMPLE, id.to_string()))?;
            let raw: String = row.try_get("tags")?;
            let mut current: BTreeSet<String> = serde_json::from_str(&raw)?;

            if mode.apply(&mut current, tags) {
                sqlx::query("UPDATE training_examples SET tags = ? WHERE id = ?")
                    .bind(serde_json::to_string(&current)?)
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await?;
                changed += 1;
            }
        }

        tx.commit().await?;
        info!(examples = ids.len(), changed, mode = %mode, "Updated training tags");
        Ok(changed)
    }

    pub async fn create_snapshot(&self, snapshot: &DatasetSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dataset_snapshots (id, name, filter, digest, example_count, examples, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.id.to_string())
        .bind(&snapshot.name)
        .bind(serde_json::to_string(&snapshot.filter)?)
        .bind(&snapshot.digest)
        .bind(snapshot.len() as i64)
        .bind(serde_json::to_string(&snapshot.examples)?)
        .bind(encode_timestamp(&snapshot.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_insert(e, &format!("snapshot '{}'", snapshot.name)))?;

        info!(
            snapshot_id = %snapshot.id,
            name = %snapshot.name,
            examples = snapshot.len(),
            "Created dataset snapshot"
        );
        Ok(())
    }

    pub async fn find_snapshot(&self, id: Uuid) -> Result<DatasetSnapshot> {
        let row = sqlx::query(
            "SELECT id, name, filter, digest, examples, created_at FROM dataset_snapshots WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(SNAPSHOT, id.to_string()))?;

        let filter: String = row.try_get("filter")?;
        let examples: String = row.try_get("examples")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(DatasetSnapshot {
            id,
            name: row.try_get("name")?,
            filter: serde_json::from_str(&filter)?,
            examples: serde_json::from_str(&examples)?,
            digest: row.try_get("digest")?,
            created_at: decode_timestamp(&created_at)?,
        })
    }

    pub async fn snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, example_count, digest, created_at FROM dataset_snapshots ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SnapshotSummary> {
                let id: String = row.try_get("id")?;
                let count: i64 = row.try_get("example_count")?;
                let created_at: String = row.try_get("created_at")?;
                Ok(SnapshotSummary {
                    id: Uuid::parse_str(&id).map_err(content_forge_core::Error::from)?,
                    name: row.try_get("name")?,
                    example_count: count as usize,
                    digest: row.try_get("digest")?,
                    created_at: decode_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    pub async fn corpus_stats(&self) -> Result<CorpusStats> {
        let rows = sqlx::query(
            r#"
            SELECT final_status, COUNT(*) AS total, SUM(success) AS successful
            FROM training_examples GROUP BY final_status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = CorpusStats::default();
        for row in rows {
            let status: String = row.try_get("final_status")?;
            let total: i64 = row.try_get("total")?;
            let successful: Option<i64> = row.try_get("successful")?;
            stats.total += total as u64;
            stats.successful += successful.unwrap_or(0) as u64;
            stats.by_status.insert(status, total as u64);
        }
        Ok(stats)
    }

    fn row_to_example(&self, row: &SqliteRow) -> Result<TrainingExample> {
        let record: String = row.try_get("record")?;
        let tags: String = row.try_get("tags")?;
        let mut example: TrainingExample = serde_json::from_str(&record)?;
        example.tags = serde_json::from_str(&tags)?;
        Ok(example)
    }
}

#[async_trait]
impl TrainingStore for SqliteTrainingStore {
    async fn insert_example(&self, example: &TrainingExample) -> content_forge_core::Result<bool> {
        Ok(self.create_example(example).await?)
    }

    async fn get_example(&self, id: Uuid) -> content_forge_core::Result<TrainingExample> {
        Ok(self.find_example(id).await?)
    }

    async fn example_for_task(
        &self,
        task_id: Uuid,
    ) -> content_forge_core::Result<Option<TrainingExample>> {
        Ok(self.find_by_task(task_id).await?)
    }

    async fn find_examples(
        &self,
        filter: &ExampleFilter,
    ) -> content_forge_core::Result<Vec<TrainingExample>> {
        Ok(self.search(filter).await?)
    }

    async fn update_tags(
        &self,
        ids: &[Uuid],
        tags: &[String],
        mode: TagMode,
    ) -> content_forge_core::Result<usize> {
        Ok(self.set_tags(ids, tags, mode).await?)
    }

    async fn insert_snapshot(&self, snapshot: &DatasetSnapshot) -> content_forge_core::Result<()> {
        Ok(self.create_snapshot(snapshot).await?)
    }

    async fn get_snapshot(&self, id: Uuid) -> content_forge_core::Result<DatasetSnapshot> {
        Ok(self.find_snapshot(id).await?)
    }

    async fn list_snapshots(&self) -> content_forge_core::Result<Vec<SnapshotSummary>> {
        Ok(self.snapshots().await?)
    }

    async fn stats(&self) -> content_forge_core::Result<CorpusStats> {
        Ok(self.corpus_stats().await?)
    }
}
