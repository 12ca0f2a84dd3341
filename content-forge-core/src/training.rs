//! Training corpus model
//!
//! Every terminal task becomes exactly one [`TrainingExample`]. Examples are
//! never deleted; curation happens through tags and filters, and snapshots
//! freeze a filtered view for export.

use crate::collaborators::PublishReceipt;
use crate::history::{output_digest, StageHistoryEntry};
use crate::task::{
    ApprovalStatus, ContentTask, EvaluationRecord, FailureReason, StageOutputs, TaskInput,
    TaskStatus,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum tag length after normalisation
pub const MAX_TAG_LEN: usize = 64;

/// Full execution trace of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub history: Vec<StageHistoryEntry>,
    pub evaluations: Vec<EvaluationRecord>,
    pub outputs: StageOutputs,
    pub refinement_count: u32,
    pub cost_accumulated: f64,
    pub failure: Option<FailureReason>,
    pub approval_status: ApprovalStatus,
    pub reviewer_id: Option<String>,
    pub reviewer_feedback: Option<String>,
    pub publication: Option<PublishReceipt>,
}

/// Labeled record of one task, immutable apart from its tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub id: Uuid,
    pub task_id: Uuid,
    pub input: TaskInput,
    pub trace: ExecutionTrace,
    pub final_status: TaskStatus,
    pub final_score: Option<f64>,
    /// True only for published tasks
    pub success: bool,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl TrainingExample {
    /// Derive an example from a terminal task and its stage history
    pub fn from_task(task: &ContentTask, history: Vec<StageHistoryEntry>) -> Result<Self> {
        if !task.is_terminal() {
            return Err(Error::precondition(
                "capture",
                format!("task {} is still in {}", task.id, task.status),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            input: task.input.clone(),
            trace: ExecutionTrace {
                history,
                evaluations: task.outputs.evaluations.clone(),
                outputs: task.outputs.clone(),
                refinement_count: task.refinement_count,
                cost_accumulated: task.cost_accumulated,
                failure: task.failure.clone(),
                approval_status: task.approval_status,
                reviewer_id: task.reviewer_id.clone(),
                reviewer_feedback: task.reviewer_feedback.clone(),
                publication: task.publication.clone(),
            },
            final_status: task.status,
            final_score: task.quality_score,
            success: task.status == TaskStatus::Published,
            tags: BTreeSet::new(),
            created_at: Utc::now(),
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Normalise a tag to lowercase and check its alphabet
pub fn normalize_tag(tag: &str) -> Result<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        return Err(Error::validation("Tags cannot be empty"));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(Error::validation(format!(
            "Tag '{}' exceeds {} characters",
            tag, MAX_TAG_LEN
        )));
    }
    if !tag
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
    {
        return Err(Error::validation(format!(
            "Tag '{}' may only contain letters, digits, '-', '_', ':' and '.'",
            tag
        )));
    }
    Ok(tag)
}

/// Whether tags are added or removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMode {
    Add,
    Remove,
}

impl TagMode {
    /// Apply the tags to a set, returning whether it changed
    pub fn apply(&self, set: &mut BTreeSet<String>, tags: &[String]) -> bool {
        let mut changed = false;
        for tag in tags {
            changed |= match self {
                TagMode::Add => set.insert(tag.clone()),
                TagMode::Remove => set.remove(tag),
            };
        }
        changed
    }
}

impl fmt::Display for TagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TagMode::Add => "add",
            TagMode::Remove => "remove",
        })
    }
}

impl FromStr for TagMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(TagMode::Add),
            "remove" => Ok(TagMode::Remove),
            other => Err(Error::validation(format!("unknown tag mode '{}'", other))),
        }
    }
}

/// Selection criteria over the corpus
///
/// Empty fields match everything, so the default filter selects the whole
/// corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExampleFilter {
    /// Every one of these tags must be present
    pub all_tags: Vec<String>,
    /// At least one of these tags must be present
    pub any_tags: Vec<String>,
    /// None of these tags may be present
    pub exclude_tags: Vec<String>,
    pub success: Option<bool>,
    pub min_score: Option<f64>,
    pub topic_contains: Option<String>,
    pub status: Option<TaskStatus>,
    pub created_after: Option<DateTime<Utc>>,
}

impl ExampleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.all_tags.push(tag.into());
        self
    }

    pub fn with_any_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.any_tags.push(tag.into());
        self
    }

    pub fn without_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.exclude_tags.push(tag.into());
        self
    }

    pub fn successful(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn min_score(mut self, score: f64) -> Self {
        self.min_score = Some(score);
        self
    }

    /// Normalise tag names so they compare against stored tags
    pub fn normalized(mut self) -> Result<Self> {
        for tags in [&mut self.all_tags, &mut self.any_tags, &mut self.exclude_tags] {
            *tags = tags
                .iter()
                .map(|t| normalize_tag(t))
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(self)
    }

    pub fn matches(&self, example: &TrainingExample) -> bool {
        if !self.all_tags.iter().all(|t| example.has_tag(t)) {
            return false;
        }
        if !self.any_tags.is_empty() && !self.any_tags.iter().any(|t| example.has_tag(t)) {
            return false;
        }
        if self.exclude_tags.iter().any(|t| example.has_tag(t)) {
            return false;
        }
        if let Some(success) = self.success {
            if example.success != success {
                return false;
            }
        }
        if let Some(min) = self.min_score {
            if example.final_score.map_or(true, |s| s < min) {
                return false;
            }
        }
        if let Some(needle) = &self.topic_contains {
            if !example
                .input
                .topic
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(status) = self.status {
            if example.final_status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if example.created_at <= after {
                return false;
            }
        }
        true
    }
}

/// Frozen, named copy of a filtered corpus view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub id: Uuid,
    pub name: String,
    pub filter: ExampleFilter,
    pub examples: Vec<TrainingExample>,
    /// SHA-256 over the serialised examples
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl DatasetSnapshot {
    /// Freeze examples under a name; examples are ordered by creation time
    pub fn freeze(
        name: &str,
        filter: ExampleFilter,
        mut examples: Vec<TrainingExample>,
    ) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Snapshot name cannot be empty"));
        }
        examples.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let digest = output_digest(&serde_json::to_string(&examples)?);
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            filter,
            examples,
            digest,
            created_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Render one JSON document per line
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for example in &self.examples {
            out.push_str(&serde_json::to_string(example)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Summary of a snapshot without its examples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub name: String,
    pub example_count: usize,
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl From<&DatasetSnapshot> for SnapshotSummary {
    fn from(snapshot: &DatasetSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            example_count: snapshot.len(),
            digest: snapshot.digest.clone(),
            created_at: snapshot.created_at,
        }
    }
}

/// Corpus statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CorpusStats {
    pub total: u64,
    pub successful: u64,
    pub by_status: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskInput;

    fn example(status: TaskStatus, score: f64, tags: &[&str]) -> TrainingExample {
        let input = TaskInput::builder()
            .topic("renewable energy incentives")
            .build()
            .unwrap();
        let mut task = ContentTask::new(input);
        task.status = status;
        task.quality_score = Some(score);
        let mut example = TrainingExample::from_task(&task, Vec::new()).unwrap();
        example.tags = tags.iter().map(|t| t.to_string()).collect();
        example
    }

    #[test]
    fn test_from_task_requires_terminal() {
        let input = TaskInput::builder().topic("heat pumps").build().unwrap();
        let task = ContentTask::new(input);
        let err = TrainingExample::from_task(&task, Vec::new()).unwrap_err();
        assert_eq!(err.category(), "precondition");
    }

    #[test]
    fn test_success_means_published() {
        assert!(example(TaskStatus::Published, 0.9, &[]).success);
        assert!(!example(TaskStatus::Rejected, 0.9, &[]).success);
        assert!(!example(TaskStatus::FailedQuality, 0.5, &[]).success);
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  Gold:v1 ").unwrap(), "gold:v1");
        assert!(normalize_tag("").is_err());
        assert!(normalize_tag("has space").is_err());
        assert!(normalize_tag(&"x".repeat(MAX_TAG_LEN + 1)).is_err());
    }

    #[test]
    fn test_tag_mode_is_reversible() {
        let mut set = BTreeSet::new();
        let tags = vec!["gold".to_string(), "reviewed".to_string()];
        assert!(TagMode::Add.apply(&mut set, &tags));
        assert!(!TagMode::Add.apply(&mut set, &tags));
        assert!(TagMode::Remove.apply(&mut set, &tags));
        assert!(set.is_empty());
    }

    #[test]
    fn test_filter_matching() {
        let gold = example(TaskStatus::Published, 0.9, &["gold", "energy"]);
        let weak = example(TaskStatus::FailedQuality, 0.5, &["energy"]);

        assert!(ExampleFilter::new().matches(&gold));
        assert!(ExampleFilter::new().with_tag("gold").matches(&gold));
        assert!(!ExampleFilter::new().with_tag("gold").matches(&weak));
        assert!(ExampleFilter::new()
            .with_any_tag("gold")
            .with_any_tag("energy")
            .matches(&weak));
        assert!(!ExampleFilter::new().without_tag("energy").matches(&weak));
        assert!(!ExampleFilter::new().successful(true).matches(&weak));
        assert!(!ExampleFilter::new().min_score(0.8).matches(&weak));

        let filter = ExampleFilter {
            topic_contains: Some("ENERGY".into()),
            status: Some(TaskStatus::Published),
            ..Default::default()
        };
        assert!(filter.matches(&gold));
        assert!(!filter.matches(&weak));
    }

    #[test]
    fn test_snapshot_digest_and_jsonl() {
        let examples = vec![
            example(TaskStatus::Published, 0.9, &["gold"]),
            example(TaskStatus::Rejected, 0.85, &[]),
        ];
        let snapshot =
            DatasetSnapshot::freeze("q3-gold", ExampleFilter::new(), examples.clone()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.digest.len(), 64);

        let again = DatasetSnapshot::freeze("other", ExampleFilter::new(), examples).unwrap();
        assert_eq!(snapshot.digest, again.digest);

        let jsonl = snapshot.to_jsonl().unwrap();
        assert_eq!(jsonl.lines().count(), 2);
        for line in jsonl.lines() {
            let parsed: TrainingExample = serde_json::from_str(line).unwrap();
            assert!(snapshot.examples.iter().any(|e| e.id == parsed.id));
        }

        assert!(DatasetSnapshot::freeze("  ", ExampleFilter::new(), Vec::new()).is_err());
    }
}
