//! Content task orchestration
//!
//! The orchestrator owns every machine-driven status. A driver advances one
//! task at a time through its stages until the task reaches approval or a
//! terminal status. Every state change is a versioned write, so a crash
//! between stages leaves the task resumable from its last committed status,
//! and a concurrent cancel is never lost.

use crate::capture::TrainingDataCapture;
use crate::stages::{StageExecutors, StageResult};
use content_forge_core::budget::CostLedger;
use content_forge_core::config::PipelineSettings;
use content_forge_core::history::StageHistoryEntry;
use content_forge_core::store::{Pagination, TaskFilter, TaskStore, Versioned};
use content_forge_core::task::{ContentTask, FailureReason, Stage, TaskInput, TaskStatus};
use content_forge_core::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RESUME_PAGE_SIZE: u32 = 100;

/// Outcome of a versioned write
pub(crate) enum Committed {
    Written(Versioned<ContentTask>),
    /// The change no longer applied to the stored task
    Unchanged(ContentTask),
}

impl Committed {
    pub(crate) fn into_task(self) -> ContentTask {
        match self {
            Committed::Written(versioned) => versioned.value,
            Committed::Unchanged(task) => task,
        }
    }
}

/// Write a change derived from `read`, re-deriving it after version conflicts
///
/// `apply` returns `None` when the change no longer applies to the freshly
/// read task; the fresh task is then returned untouched.
pub(crate) async fn commit<F>(
    store: &dyn TaskStore,
    mut read: Versioned<ContentTask>,
    conflict_retries: u32,
    mut apply: F,
) -> Result<Committed>
where
    F: FnMut(&ContentTask) -> Result<Option<ContentTask>> + Send,
{
    for round in 0..=conflict_retries {
        let Some(next) = apply(&read.value)? else {
            return Ok(Committed::Unchanged(read.value));
        };
        match store.update(&next, read.version).await {
            Ok(version) => return Ok(Committed::Written(Versioned::new(next, version))),
            Err(e) if e.is_conflict() => {
                debug!(task_id = %read.value.id, round, "Re-reading task after version conflict");
                read = store.get(read.value.id).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::version_conflict(
        "ContentTask",
        read.value.id.to_string(),
        read.version,
    ))
}

/// Marks a task as driven by this process for as long as it lives
struct ActiveGuard {
    active: Arc<DashMap<Uuid, ()>>,
    id: Uuid,
}

impl ActiveGuard {
    fn acquire(active: &Arc<DashMap<Uuid, ()>>, id: Uuid) -> Option<Self> {
        match active.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    active: Arc::clone(active),
                    id,
                })
            }
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Drives content tasks through the pipeline
#[derive(Clone)]
pub struct ContentOrchestrator {
    store: Arc<dyn TaskStore>,
    stages: Arc<StageExecutors>,
    capture: Arc<TrainingDataCapture>,
    settings: Arc<PipelineSettings>,
    active: Arc<DashMap<Uuid, ()>>,
}

impl ContentOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        stages: Arc<StageExecutors>,
        capture: Arc<TrainingDataCapture>,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        Self {
            store,
            stages,
            capture,
            settings,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Validate and persist a request, then drive it in the background
    pub async fn create(&self, input: TaskInput) -> Result<Uuid> {
        let id = self.accept(input).await?;
        self.spawn_driver(id);
        Ok(id)
    }

    /// Validate and persist a request without driving it
    ///
    /// The task stays in `created` until [`resume_incomplete`](Self::resume_incomplete)
    /// picks it up.
    pub async fn submit(&self, input: TaskInput) -> Result<Uuid> {
        self.accept(input).await
    }

    /// Validate and persist a request, then drive it to approval or a
    /// terminal status before returning
    pub async fn create_and_wait(&self, input: TaskInput) -> Result<ContentTask> {
        let id = self.accept(input).await?;
        self.drive(id).await
    }

    async fn accept(&self, input: TaskInput) -> Result<Uuid> {
        input.validate_against(&self.settings)?;
        let task = ContentTask::new(input);
        self.store.insert(&task).await?;
        info!(
            task_id = %task.id,
            topic = %task.input.topic,
            target_length = task.input.target_length,
            "Accepted content task"
        );
        Ok(task.id)
    }

    fn spawn_driver(&self, id: Uuid) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.drive(id).await {
                error!(task_id = %id, category = e.category(), "Task driver stopped: {}", e);
            }
        });
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.active.contains_key(&id)
    }

    /// Advance a task until the driver no longer owns it
    ///
    /// Returns the current task without doing anything when another driver
    /// in this process already owns it.
    pub async fn drive(&self, id: Uuid) -> Result<ContentTask> {
        let Some(_guard) = ActiveGuard::acquire(&self.active, id) else {
            debug!(task_id = %id, "Task already has a driver");
            return self.get(id).await;
        };

        loop {
            let task = self.advance(id).await?;
            if task.status.is_machine_driven() {
                continue;
            }
            if task.is_terminal() {
                self.capture_quietly(id).await;
            }
            info!(task_id = %id, status = %task.status, cost = task.cost_accumulated, "Driver finished");
            return Ok(task);
        }
    }

    async fn capture_quietly(&self, id: Uuid) {
        if let Err(e) = self.capture.capture(id).await {
            warn!(task_id = %id, "Failed to capture training example: {}", e);
        }
    }

    /// Perform at most one step for a task
    ///
    /// Statuses the driver does not own are returned unchanged, which makes
    /// repeated calls safe.
    pub async fn advance(&self, id: Uuid) -> Result<ContentTask> {
        let read = self.store.get(id).await?;
        let status = read.value.status;
        if !status.is_machine_driven() {
            return Ok(read.value);
        }

        if read.value.cancel_requested {
            let stage = status.stage().unwrap_or(Stage::Research);
            let spent = read.value.cost_accumulated;
            return self
                .fail(read, stage, 1, spent, FailureReason::Cancelled)
                .await;
        }

        let Some(stage) = status.stage() else {
            let committed = commit(
                self.store.as_ref(),
                read,
                self.settings.conflict_retries,
                |fresh| {
                    if fresh.status != TaskStatus::Created || fresh.cancel_requested {
                        return Ok(None);
                    }
                    let mut next = fresh.clone();
                    next.transition_to(TaskStatus::Researching)?;
                    Ok(Some(next))
                },
            )
            .await?;
            return Ok(committed.into_task());
        };

        self.run_stage(read, stage).await
    }

    /// Execute a stage with bounded retries and commit its outcome
    async fn run_stage(&self, read: Versioned<ContentTask>, stage: Stage) -> Result<ContentTask> {
        let task = read.value.clone();
        let mut ledger = CostLedger::for_task(&task, self.settings.default_budget_ceiling);
        let policy = &self.settings.retry;
        let stage_timeout = self.settings.stage_timeout();
        let mut attempt = 1u32;

        loop {
            let outcome = match timeout(stage_timeout, self.stages.execute(stage, &task, &mut ledger))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::timeout(
                    format!("{} stage", stage),
                    self.settings.stage_timeout_secs,
                )),
            };

            let e = match outcome {
                Ok(result) => return self.complete(read, stage, attempt, ledger, result).await,
                Err(e) => e,
            };

            if e.is_transient() && attempt < policy.max_attempts {
                warn!(
                    task_id = %task.id,
                    stage = %stage,
                    attempt,
                    category = e.category(),
                    "Stage attempt failed, retrying: {}",
                    e
                );
                let entry = StageHistoryEntry::new(task.id, stage, task.status)
                    .with_attempt(attempt)
                    .with_note(format!("attempt failed: {}", e));
                self.store.append_history(&entry).await?;
                let delay = policy.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                continue;
            }

            let reason = match &e {
                Error::BudgetExceeded { spent, ceiling, .. } => FailureReason::BudgetExceeded {
                    spent: *spent,
                    ceiling: *ceiling,
                },
                Error::Backend { .. }
                | Error::Timeout { .. }
                | Error::Configuration { .. }
                | Error::Precondition { .. }
                | Error::Validation { .. } => FailureReason::StageFailed {
                    stage,
                    message: e.to_string(),
                },
                _ => FailureReason::Unexpected {
                    message: e.to_string(),
                },
            };
            error!(
                task_id = %task.id,
                stage = %stage,
                attempt,
                reason = reason.code(),
                "Stage failed: {}",
                e
            );
            return self.fail(read, stage, attempt, ledger.spent(), reason).await;
        }
    }

    /// Commit a successful stage; a cancel that raced the stage wins
    async fn complete(
        &self,
        read: Versioned<ContentTask>,
        stage: Stage,
        attempt: u32,
        ledger: CostLedger,
        result: StageResult,
    ) -> Result<ContentTask> {
        let spent = ledger.spent();
        let from = read.value.status;
        let committed = commit(
            self.store.as_ref(),
            read,
            self.settings.conflict_retries,
            |fresh| {
                if fresh.status != from {
                    return Ok(None);
                }
                if fresh.cancel_requested {
                    let mut cancelled = fresh.clone();
                    cancelled.cost_accumulated = spent;
                    cancelled.fail(FailureReason::Cancelled)?;
                    return Ok(Some(cancelled));
                }
                let mut next = result.task.clone();
                next.cost_accumulated = spent;
                Ok(Some(next))
            },
        )
        .await?;

        let task = match committed {
            Committed::Written(versioned) => versioned.value,
            Committed::Unchanged(task) => {
                warn!(task_id = %task.id, stage = %stage, status = %task.status, "Stage result superseded");
                return Ok(task);
            }
        };

        let mut entry = StageHistoryEntry::new(task.id, stage, task.status)
            .with_backend(result.backend_id.clone())
            .with_attempt(attempt)
            .with_cost(result.cost);
        if let Some(output) = &result.output {
            entry = entry.with_output(output);
        }
        let note = if task.failure == Some(FailureReason::Cancelled) {
            Some("cancelled while the stage ran".to_string())
        } else {
            result.note.clone()
        };
        if let Some(note) = note {
            entry = entry.with_note(note);
        }
        self.store.append_history(&entry).await?;

        info!(
            task_id = %task.id,
            stage = %stage,
            status = %task.status,
            backend_id = ?result.backend_id,
            cost = task.cost_accumulated,
            "Stage committed"
        );
        Ok(task)
    }

    /// Move a task into a failure status, keeping the money already spent
    async fn fail(
        &self,
        read: Versioned<ContentTask>,
        stage: Stage,
        attempt: u32,
        spent: f64,
        reason: FailureReason,
    ) -> Result<ContentTask> {
        let from = read.value.status;
        let committed = commit(
            self.store.as_ref(),
            read,
            self.settings.conflict_retries,
            |fresh| {
                if fresh.status != from {
                    return Ok(None);
                }
                let reason = if fresh.cancel_requested {
                    FailureReason::Cancelled
                } else {
                    reason.clone()
                };
                let mut failed = fresh.clone();
                failed.cost_accumulated = failed.cost_accumulated.max(spent);
                failed.fail(reason)?;
                Ok(Some(failed))
            },
        )
        .await?;

        let task = match committed {
            Committed::Written(versioned) => versioned.value,
            Committed::Unchanged(task) => return Ok(task),
        };

        let mut entry = StageHistoryEntry::new(task.id, stage, task.status).with_attempt(attempt);
        if let Some(reason) = &task.failure {
            entry = entry.with_note(reason.describe());
        }
        self.store.append_history(&entry).await?;
        info!(
            task_id = %task.id,
            status = %task.status,
            reason = ?task.failure.as_ref().map(FailureReason::code),
            "Task failed"
        );
        Ok(task)
    }

    /// Request cancellation of a task the driver still owns
    ///
    /// The request is recorded durably; the driver honours it at its next
    /// commit. Tasks without a driver in this process are finalised at once.
    pub async fn cancel(&self, id: Uuid) -> Result<ContentTask> {
        let read = self.store.get(id).await?;
        if !read.value.can_cancel() {
            return Err(Error::precondition(
                "cancel",
                format!("task {} is in {}", id, read.value.status),
            ));
        }

        let committed = commit(
            self.store.as_ref(),
            read,
            self.settings.conflict_retries,
            |fresh| {
                if !fresh.can_cancel() {
                    return Err(Error::precondition(
                        "cancel",
                        format!("task {} is in {}", fresh.id, fresh.status),
                    ));
                }
                if fresh.cancel_requested {
                    return Ok(None);
                }
                let mut next = fresh.clone();
                next.cancel_requested = true;
                next.updated_at = chrono::Utc::now();
                Ok(Some(next))
            },
        )
        .await?;
        info!(task_id = %id, "Cancellation requested");

        if self.is_active(id) {
            return Ok(committed.into_task());
        }
        self.drive(id).await
    }

    /// Restart drivers for every task left in a machine-driven status
    ///
    /// Also records training examples for terminal tasks whose capture
    /// never happened. Returns how many drivers were started.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let filter = TaskFilter::incomplete();
        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list(&filter, Pagination::new(offset, RESUME_PAGE_SIZE))
                .await?;
            let fetched = page.len() as u32;
            ids.extend(page.into_iter().map(|task| task.id));
            if fetched < RESUME_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        let mut resumed = 0;
        for id in ids {
            if self.is_active(id) {
                continue;
            }
            self.spawn_driver(id);
            resumed += 1;
        }
        info!(resumed, "Resumed incomplete tasks");

        if let Err(e) = self.capture.capture_missing().await {
            warn!(category = e.category(), "Training capture sweep failed: {}", e);
        }
        Ok(resumed)
    }

    pub async fn get(&self, id: Uuid) -> Result<ContentTask> {
        Ok(self.store.get(id).await?.into_inner())
    }

    pub async fn list(&self, filter: &TaskFilter, page: Pagination) -> Result<Vec<ContentTask>> {
        self.store.list(filter, page).await
    }

    pub async fn history(&self, id: Uuid) -> Result<Vec<StageHistoryEntry>> {
        self.store.get(id).await?;
        self.store.history(id).await
    }
}
