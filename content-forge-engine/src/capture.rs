//! Training data capture
//!
//! Every task that reaches a terminal status is recorded once as a
//! [`TrainingExample`]. Examples can be tagged, filtered and frozen into
//! named, immutable snapshots for export.

use content_forge_core::store::{Pagination, TaskFilter, TaskStore, TrainingStore};
use content_forge_core::training::{
    normalize_tag, CorpusStats, DatasetSnapshot, ExampleFilter, SnapshotSummary, TagMode,
    TrainingExample,
};
use content_forge_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SWEEP_PAGE_SIZE: u32 = 200;

pub struct TrainingDataCapture {
    tasks: Arc<dyn TaskStore>,
    corpus: Arc<dyn TrainingStore>,
}

impl TrainingDataCapture {
    pub fn new(tasks: Arc<dyn TaskStore>, corpus: Arc<dyn TrainingStore>) -> Self {
        Self { tasks, corpus }
    }

    /// Record a terminal task; capturing the same task again returns the
    /// existing example
    pub async fn capture(&self, task_id: Uuid) -> Result<TrainingExample> {
        if let Some(existing) = self.corpus.example_for_task(task_id).await? {
            debug!(task_id = %task_id, example_id = %existing.id, "Task already captured");
            return Ok(existing);
        }

        let task = self.tasks.get(task_id).await?.into_inner();
        let history = self.tasks.history(task_id).await?;
        let example = TrainingExample::from_task(&task, history)?;

        if self.corpus.insert_example(&example).await? {
            info!(
                task_id = %task_id,
                example_id = %example.id,
                status = %example.final_status,
                success = example.success,
                "Captured training example"
            );
            Ok(example)
        } else {
            // Lost a race with another capture of the same task
            self.corpus
                .example_for_task(task_id)
                .await?
                .ok_or_else(|| Error::not_found("TrainingExample", task_id.to_string()))
        }
    }

    /// Capture every terminal task that has no example yet
    ///
    /// Returns how many examples were recorded. A task that fails to capture
    /// is skipped and picked up by the next sweep.
    pub async fn capture_missing(&self) -> Result<usize> {
        let filter = TaskFilter::terminal().oldest_first();
        let mut captured = 0;
        let mut offset = 0;
        loop {
            let page = self
                .tasks
                .list(&filter, Pagination::new(offset, SWEEP_PAGE_SIZE))
                .await?;
            let fetched = page.len() as u32;
            for task in page {
                if self.corpus.example_for_task(task.id).await?.is_some() {
                    continue;
                }
                match self.capture(task.id).await {
                    Ok(_) => captured += 1,
                    Err(e) => warn!(task_id = %task.id, "Failed to capture training example: {}", e),
                }
            }
            if fetched < SWEEP_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        if captured > 0 {
            info!(captured, "Captured missing training examples");
        }
        Ok(captured)
    }

    pub async fn get_example(&self, id: Uuid) -> Result<TrainingExample> {
        self.corpus.get_example(id).await
    }

    /// Add or remove tags on examples; returns how many examples changed
    pub async fn tag(&self, ids: &[Uuid], tags: &[String], mode: TagMode) -> Result<usize> {
        if ids.is_empty() {
            return Err(Error::validation("At least one example id is required"));
        }
        let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = normalize_tag(tag)?;
            if !normalized.contains(&tag) {
                normalized.push(tag);
            }
        }
        if normalized.is_empty() {
            return Err(Error::validation("At least one tag is required"));
        }

        let changed = self.corpus.update_tags(ids, &normalized, mode).await?;
        info!(examples = ids.len(), changed, ?mode, tags = ?normalized, "Updated example tags");
        Ok(changed)
    }

    pub async fn examples(&self, filter: &ExampleFilter) -> Result<Vec<TrainingExample>> {
        let filter = filter.clone().normalized()?;
        self.corpus.find_examples(&filter).await
    }

    /// Ids of the examples matching a filter, oldest first
    pub async fn filter(&self, filter: &ExampleFilter) -> Result<Vec<Uuid>> {
        Ok(self
            .examples(filter)
            .await?
            .into_iter()
            .map(|example| example.id)
            .collect())
    }

    /// Freeze the examples currently matching a filter under a unique name
    pub async fn snapshot(&self, filter: &ExampleFilter, name: &str) -> Result<DatasetSnapshot> {
        let filter = filter.clone().normalized()?;
        let examples = self.corpus.find_examples(&filter).await?;
        let snapshot = DatasetSnapshot::freeze(name, filter, examples)?;
        self.corpus.insert_snapshot(&snapshot).await?;
        info!(
            snapshot_id = %snapshot.id,
            name = %snapshot.name,
            examples = snapshot.len(),
            digest = %snapshot.digest,
            "Created dataset snapshot"
        );
        Ok(snapshot)
    }

    pub async fn get_snapshot(&self, id: Uuid) -> Result<DatasetSnapshot> {
        self.corpus.get_snapshot(id).await
    }

    /// Export a snapshot as JSON Lines, one example per line
    pub async fn export_snapshot(&self, id: Uuid) -> Result<String> {
        self.corpus.get_snapshot(id).await?.to_jsonl()
    }

    pub async fn snapshots(&self) -> Result<Vec<SnapshotSummary>> {
        self.corpus.list_snapshots().await
    }

    pub async fn stats(&self) -> Result<CorpusStats> {
        self.corpus.stats().await
    }
}
