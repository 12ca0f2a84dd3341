//! Human approval checkpoint
//!
//! Nothing is published without a recorded approval. A decision is written
//! once; repeating a decision returns the task as it stands and never
//! publishes twice.

use crate::capture::TrainingDataCapture;
use crate::orchestrator::{commit, Committed};
use content_forge_core::collaborators::{PublishMetadata, Publisher};
use content_forge_core::config::PipelineSettings;
use content_forge_core::history::StageHistoryEntry;
use content_forge_core::store::{Pagination, TaskFilter, TaskStore, Versioned};
use content_forge_core::task::{ApprovalStatus, ContentTask, FailureReason, Stage, TaskStatus};
use content_forge_core::{Error, Result};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

const PENDING_PAGE_SIZE: u32 = 200;

/// A reviewer's verdict on a task awaiting approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub approved: bool,
    pub reviewer_id: String,
    pub feedback: Option<String>,
}

impl Decision {
    pub fn approve<S: Into<String>>(reviewer_id: S) -> Self {
        Self {
            approved: true,
            reviewer_id: reviewer_id.into(),
            feedback: None,
        }
    }

    pub fn reject<S: Into<String>>(reviewer_id: S) -> Self {
        Self {
            approved: false,
            reviewer_id: reviewer_id.into(),
            feedback: None,
        }
    }

    pub fn with_feedback<S: Into<String>>(mut self, feedback: S) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}

pub struct ApprovalGate {
    store: Arc<dyn TaskStore>,
    publisher: Arc<dyn Publisher>,
    capture: Arc<TrainingDataCapture>,
    settings: Arc<PipelineSettings>,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn Publisher>,
        capture: Arc<TrainingDataCapture>,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        Self {
            store,
            publisher,
            capture,
            settings,
        }
    }

    /// Every task waiting for a reviewer, oldest first
    pub async fn pending(&self) -> Result<Vec<ContentTask>> {
        let filter = TaskFilter::default()
            .with_status(TaskStatus::AwaitingApproval)
            .oldest_first();
        let mut tasks = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list(&filter, Pagination::new(offset, PENDING_PAGE_SIZE))
                .await?;
            let fetched = page.len() as u32;
            tasks.extend(page);
            if fetched < PENDING_PAGE_SIZE {
                return Ok(tasks);
            }
            offset += fetched;
        }
    }

    /// Record a decision and, on approval, publish
    pub async fn decide(&self, id: Uuid, decision: Decision) -> Result<ContentTask> {
        let read = self.store.get(id).await?;
        if read.value.approval_status.is_decided() {
            info!(
                task_id = %id,
                approval = read.value.approval_status.as_str(),
                "Task already decided, ignoring repeated decision"
            );
            return Ok(read.value);
        }
        if read.value.status != TaskStatus::AwaitingApproval {
            return Err(Error::precondition(
                "decide",
                format!("task {} is in {}, not awaiting_approval", id, read.value.status),
            ));
        }
        if decision.reviewer_id.trim().is_empty() {
            return Err(Error::validation("Reviewer id is required"));
        }

        let committed = commit(
            self.store.as_ref(),
            read,
            self.settings.conflict_retries,
            |fresh| {
                if fresh.approval_status.is_decided() {
                    return Ok(None);
                }
                let mut next = fresh.clone();
                next.apply_decision(
                    decision.approved,
                    &decision.reviewer_id,
                    decision.feedback.clone(),
                )?;
                Ok(Some(next))
            },
        )
        .await?;

        let decided = match committed {
            Committed::Written(versioned) => versioned,
            Committed::Unchanged(task) => return Ok(task),
        };
        info!(
            task_id = %id,
            approval = decided.value.approval_status.as_str(),
            reviewer_id = ?decided.value.reviewer_id,
            "Decision recorded"
        );
        let entry = StageHistoryEntry::new(id, Stage::Approval, decided.value.status)
            .with_note(format!(
                "{} by {}",
                decided.value.approval_status.as_str(),
                decision.reviewer_id.trim()
            ));
        self.store.append_history(&entry).await?;

        let task = if decided.value.approval_status == ApprovalStatus::Approved {
            self.publish(decided).await?
        } else {
            decided.value
        };

        if task.is_terminal() {
            if let Err(e) = self.capture.capture(id).await {
                warn!(task_id = %id, "Failed to capture training example: {}", e);
            }
        }
        Ok(task)
    }

    /// Publish an approved task exactly once
    async fn publish(&self, approved: Versioned<ContentTask>) -> Result<ContentTask> {
        let task = &approved.value;
        let outcome = match task.outputs.formatted.as_ref() {
            Some(content) => {
                let metadata = PublishMetadata {
                    task_id: task.id,
                    topic: task.input.topic.clone(),
                    keywords: task.input.keywords.clone(),
                    asset: task.outputs.asset.clone(),
                    quality_score: task.quality_score,
                    reviewer_id: task.reviewer_id.clone(),
                };
                match timeout(
                    self.settings.publish_timeout(),
                    self.publisher.publish(content, &metadata),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(
                        "publish",
                        self.settings.publish_timeout_secs,
                    )),
                }
            }
            None => Err(Error::precondition(
                "publish",
                format!("task {} has no formatted content", task.id),
            )),
        };

        let id = task.id;
        let committed = commit(
            self.store.as_ref(),
            approved,
            self.settings.conflict_retries,
            |fresh| {
                if fresh.status != TaskStatus::Publishing {
                    return Ok(None);
                }
                let mut next = fresh.clone();
                match &outcome {
                    Ok(receipt) => next.mark_published(receipt.clone())?,
                    Err(e) => next.fail(FailureReason::PublishFailed {
                        message: e.to_string(),
                    })?,
                }
                Ok(Some(next))
            },
        )
        .await?;

        let task = committed.into_task();
        let mut entry = StageHistoryEntry::new(id, Stage::Publish, task.status);
        match &outcome {
            Ok(receipt) => {
                info!(task_id = %id, external_id = %receipt.external_id, url = %receipt.url, "Published");
                entry = entry.with_note(format!("published as {}", receipt.external_id));
            }
            Err(e) => {
                error!(task_id = %id, category = e.category(), "Publishing failed: {}", e);
                entry = entry.with_note(format!("publish failed: {}", e));
            }
        }
        self.store.append_history(&entry).await?;
        Ok(task)
    }
}
