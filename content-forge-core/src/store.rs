//! Persistence seams
//!
//! The task store is the only shared mutable resource of the pipeline. Writes
//! are optimistic: every update names the version it was derived from and
//! fails with [`Error::VersionConflict`](crate::Error::VersionConflict) when the
//! stored version has moved on.

use crate::history::StageHistoryEntry;
use crate::task::{ContentTask, TaskStatus};
use crate::training::{
    CorpusStats, DatasetSnapshot, ExampleFilter, SnapshotSummary, TagMode, TrainingExample,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default page size for listings
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// A record together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: i64) -> Self {
        Self { value, version }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Listing criteria for tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskFilter {
    /// Empty matches every status
    pub statuses: Vec<TaskStatus>,
    pub topic_contains: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    /// List oldest first instead of newest first
    pub oldest_first: bool,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.oldest_first = true;
        self
    }

    /// Tasks that reached a final status
    pub fn terminal() -> Self {
        Self {
            statuses: TaskStatus::ALL
                .into_iter()
                .filter(TaskStatus::is_terminal)
                .collect(),
            ..Default::default()
        }
    }

    /// Tasks the driver still owns
    pub fn incomplete() -> Self {
        Self {
            statuses: TaskStatus::ALL
                .into_iter()
                .filter(TaskStatus::is_machine_driven)
                .collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, 1_000),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_SIZE)
    }
}

/// Durable task records with optimistic versioning and append-only history
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task at version 1; inserting an existing id is a no-op
    /// that returns the stored version
    async fn insert(&self, task: &ContentTask) -> Result<i64>;

    async fn get(&self, id: Uuid) -> Result<Versioned<ContentTask>>;

    /// Replace the record if it is still at `expected_version`; returns the new version
    async fn update(&self, task: &ContentTask, expected_version: i64) -> Result<i64>;

    /// Newest first unless the filter asks for oldest first
    async fn list(&self, filter: &TaskFilter, page: Pagination) -> Result<Vec<ContentTask>>;

    async fn append_history(&self, entry: &StageHistoryEntry) -> Result<()>;

    /// History in insertion order
    async fn history(&self, task_id: Uuid) -> Result<Vec<StageHistoryEntry>>;
}

/// Training corpus persistence
#[async_trait]
pub trait TrainingStore: Send + Sync {
    /// Insert an example; returns false when the task already has one
    async fn insert_example(&self, example: &TrainingExample) -> Result<bool>;

    async fn get_example(&self, id: Uuid) -> Result<TrainingExample>;

    async fn example_for_task(&self, task_id: Uuid) -> Result<Option<TrainingExample>>;

    /// Examples matching the filter, oldest first
    async fn find_examples(&self, filter: &ExampleFilter) -> Result<Vec<TrainingExample>>;

    /// Add or remove tags on the given examples; returns how many changed.
    /// Unknown ids fail the whole call.
    async fn update_tags(&self, ids: &[Uuid], tags: &[String], mode: TagMode) -> Result<usize>;

    /// Persist a snapshot; names are unique
    async fn insert_snapshot(&self, snapshot: &DatasetSnapshot) -> Result<()>;

    async fn get_snapshot(&self, id: Uuid) -> Result<DatasetSnapshot>;

    async fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>>;

    async fn stats(&self) -> Result<CorpusStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_filter_covers_driver_states() {
        let filter = TaskFilter::incomplete();
        assert_eq!(filter.statuses.len(), 7);
        assert!(filter.statuses.contains(&TaskStatus::Created));
        assert!(!filter.statuses.contains(&TaskStatus::AwaitingApproval));
        assert!(!filter.statuses.contains(&TaskStatus::Publishing));
    }

    #[test]
    fn test_pagination_clamps_limit() {
        assert_eq!(Pagination::new(0, 0).limit, 1);
        assert_eq!(Pagination::new(0, 50_000).limit, 1_000);
        assert_eq!(Pagination::default().limit, DEFAULT_PAGE_SIZE);
    }
}
