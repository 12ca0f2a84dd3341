//! Append-only stage history
//!
//! One entry per stage attempt outcome. The primary task record stays small
//! while the history keeps enough to audit and replay a run.

use crate::task::{Stage, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// SHA-256 digest of a stage output, hex encoded
pub fn output_digest(output: &str) -> String {
    hex::encode(Sha256::digest(output.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub task_id: Uuid,
    pub stage: Stage,
    /// Task status after the attempt
    pub status: TaskStatus,
    pub backend_id: Option<String>,
    pub attempt: u32,
    pub output_digest: Option<String>,
    pub cost: f64,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StageHistoryEntry {
    pub fn new(task_id: Uuid, stage: Stage, status: TaskStatus) -> Self {
        Self {
            task_id,
            stage,
            status,
            backend_id: None,
            attempt: 1,
            output_digest: None,
            cost: 0.0,
            note: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_backend<S: Into<String>>(mut self, backend_id: Option<S>) -> Self {
        self.backend_id = backend_id.map(Into::into);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output_digest = Some(output_digest(output));
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_sha256() {
        assert_eq!(
            output_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(output_digest("draft"), output_digest("draft"));
        assert_ne!(output_digest("draft"), output_digest("draft "));
    }

    #[test]
    fn test_entry_builder() {
        let id = Uuid::new_v4();
        let entry = StageHistoryEntry::new(id, Stage::Draft, TaskStatus::QaReview)
            .with_backend(Some("secondary"))
            .with_attempt(2)
            .with_output("text")
            .with_cost(0.4)
            .with_note("fallback after timeout");
        assert_eq!(entry.backend_id.as_deref(), Some("secondary"));
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.output_digest.as_ref().map(String::len), Some(64));
    }
}
