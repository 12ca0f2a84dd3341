//! Content task domain model and its state machine
//!
//! A [`ContentTask`] carries a topic from acceptance through research, drafting,
//! quality-gated refinement, asset selection and formatting up to the mandatory
//! approval checkpoint, and finally to publication or rejection.
//!
//! # Examples
//!
//! ```rust
//! use content_forge_core::task::*;
//!
//! let input = TaskInput::builder()
//!     .topic("renewable energy incentives")
//!     .target_length(800)
//!     .style(ContentStyle::Informative)
//!     .keyword("solar")
//!     .keyword("tax credit")
//!     .quality_threshold(0.8)
//!     .build()
//!     .unwrap();
//!
//! let task = ContentTask::new(input);
//! assert_eq!(task.status, TaskStatus::Created);
//! assert!(!task.is_terminal());
//! ```

use crate::collaborators::{AssetReference, FormattedContent, PublishReceipt};
use crate::config::PipelineSettings;
use crate::quality::{Evaluation, Feedback};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default quality threshold applied when the request does not carry one
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.8;

/// Maximum number of keywords accepted on a single request
pub const MAX_KEYWORDS: usize = 20;

/// One discrete step of the content pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Draft,
    QualityReview,
    Refine,
    AssetSelection,
    Format,
    Approval,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Draft => "draft",
            Stage::QualityReview => "quality_review",
            Stage::Refine => "refine",
            Stage::AssetSelection => "asset_selection",
            Stage::Format => "format",
            Stage::Approval => "approval",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "research" => Ok(Stage::Research),
            "draft" => Ok(Stage::Draft),
            "quality_review" => Ok(Stage::QualityReview),
            "refine" => Ok(Stage::Refine),
            "asset_selection" => Ok(Stage::AssetSelection),
            "format" => Ok(Stage::Format),
            "approval" => Ok(Stage::Approval),
            "publish" => Ok(Stage::Publish),
            other => Err(Error::validation(format!("unknown stage '{}'", other))),
        }
    }
}

/// Canonical task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Researching,
    Drafting,
    QaReview,
    Refining,
    AssetSelection,
    Formatting,
    AwaitingApproval,
    Publishing,
    Published,
    Rejected,
    FailedQuality,
    FailedError,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 13] = [
        TaskStatus::Created,
        TaskStatus::Researching,
        TaskStatus::Drafting,
        TaskStatus::QaReview,
        TaskStatus::Refining,
        TaskStatus::AssetSelection,
        TaskStatus::Formatting,
        TaskStatus::AwaitingApproval,
        TaskStatus::Publishing,
        TaskStatus::Published,
        TaskStatus::Rejected,
        TaskStatus::FailedQuality,
        TaskStatus::FailedError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Researching => "researching",
            TaskStatus::Drafting => "drafting",
            TaskStatus::QaReview => "qa_review",
            TaskStatus::Refining => "refining",
            TaskStatus::AssetSelection => "asset_selection",
            TaskStatus::Formatting => "formatting",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Publishing => "publishing",
            TaskStatus::Published => "published",
            TaskStatus::Rejected => "rejected",
            TaskStatus::FailedQuality => "failed_quality",
            TaskStatus::FailedError => "failed_error",
        }
    }

    /// No further stage transition occurs from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Published
                | TaskStatus::Rejected
                | TaskStatus::FailedQuality
                | TaskStatus::FailedError
        )
    }

    /// Statuses owned by the orchestrator's driver
    pub fn is_machine_driven(&self) -> bool {
        matches!(
            self,
            TaskStatus::Created
                | TaskStatus::Researching
                | TaskStatus::Drafting
                | TaskStatus::QaReview
                | TaskStatus::Refining
                | TaskStatus::AssetSelection
                | TaskStatus::Formatting
        )
    }

    /// The stage executed while the task sits in this status
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TaskStatus::Researching => Some(Stage::Research),
            TaskStatus::Drafting => Some(Stage::Draft),
            TaskStatus::QaReview => Some(Stage::QualityReview),
            TaskStatus::Refining => Some(Stage::Refine),
            TaskStatus::AssetSelection => Some(Stage::AssetSelection),
            TaskStatus::Formatting => Some(Stage::Format),
            TaskStatus::AwaitingApproval => Some(Stage::Approval),
            TaskStatus::Publishing => Some(Stage::Publish),
            _ => None,
        }
    }

    /// Transition table of the pipeline
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Created, Researching) => true,
            (Researching, Drafting) => true,
            (Drafting, QaReview) => true,
            (QaReview, Refining | AssetSelection | FailedQuality) => true,
            (Refining, QaReview) => true,
            (AssetSelection, Formatting) => true,
            (Formatting, AwaitingApproval) => true,
            (AwaitingApproval, Publishing | Rejected) => true,
            (Publishing, Published | FailedError) => true,
            (current, FailedError) => current.is_machine_driven(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| Error::validation(format!("unknown task status '{}'", s)))
    }
}

/// Style and tone requested for the article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentStyle {
    #[default]
    Informative,
    Conversational,
    Persuasive,
    Technical,
    Narrative,
}

impl ContentStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStyle::Informative => "informative",
            ContentStyle::Conversational => "conversational",
            ContentStyle::Persuasive => "persuasive",
            ContentStyle::Technical => "technical",
            ContentStyle::Narrative => "narrative",
        }
    }

    /// Guidance injected into generation prompts
    pub fn guidance(&self) -> &'static str {
        match self {
            ContentStyle::Informative => "clear, neutral and well-sourced, aimed at a general audience",
            ContentStyle::Conversational => "friendly and direct, addressing the reader as 'you'",
            ContentStyle::Persuasive => "argument-driven with a clear call to action",
            ContentStyle::Technical => "precise and detailed, assuming a practitioner audience",
            ContentStyle::Narrative => "story-led, with concrete scenes and examples",
        }
    }
}

impl fmt::Display for ContentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "informative" => Ok(ContentStyle::Informative),
            "conversational" => Ok(ContentStyle::Conversational),
            "persuasive" => Ok(ContentStyle::Persuasive),
            "technical" => Ok(ContentStyle::Technical),
            "narrative" => Ok(ContentStyle::Narrative),
            other => Err(Error::validation(format!("unknown content style '{}'", other))),
        }
    }
}

/// Human approval state, written only by the approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    /// A decided approval is immutable
    pub fn is_decided(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl FromStr for ApprovalStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(Error::validation(format!(
                "unknown approval status '{}'",
                other
            ))),
        }
    }
}

/// Structured reason attached to a failed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FailureReason {
    BudgetExceeded { spent: f64, ceiling: f64 },
    StageFailed { stage: Stage, message: String },
    QualityNotMet { best_score: f64, refinements: u32 },
    PublishFailed { message: String },
    Cancelled,
    Unexpected { message: String },
}

impl FailureReason {
    /// Stable reason code for dashboards and filters
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::BudgetExceeded { .. } => "budget_exceeded",
            FailureReason::StageFailed { .. } => "stage_failed",
            FailureReason::QualityNotMet { .. } => "quality_not_met",
            FailureReason::PublishFailed { .. } => "publish_failed",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Unexpected { .. } => "unexpected",
        }
    }

    /// Human-readable description
    pub fn describe(&self) -> String {
        match self {
            FailureReason::BudgetExceeded { spent, ceiling } => format!(
                "cost budget of ${:.2} would be exceeded (spent ${:.2})",
                ceiling, spent
            ),
            FailureReason::StageFailed { stage, message } => {
                format!("{} stage failed: {}", stage, message)
            }
            FailureReason::QualityNotMet {
                best_score,
                refinements,
            } => format!(
                "quality threshold not reached after {} refinements (best score {:.2})",
                refinements, best_score
            ),
            FailureReason::PublishFailed { message } => {
                format!("approved but publishing failed: {}", message)
            }
            FailureReason::Cancelled => "cancelled before approval".to_string(),
            FailureReason::Unexpected { message } => format!("unexpected failure: {}", message),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Validated input of a content request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub topic: String,
    /// Target length in words
    pub target_length: u32,
    pub style: ContentStyle,
    pub keywords: Vec<String>,
    pub stage_models: HashMap<Stage, String>,
    pub quality_threshold: f64,
    pub max_refinements: Option<u32>,
    pub budget_ceiling: Option<f64>,
}

impl TaskInput {
    /// Create a builder for constructing a TaskInput
    pub fn builder() -> TaskInputBuilder {
        TaskInputBuilder::new()
    }

    /// Check the input against the configured pipeline bounds
    pub fn validate_against(&self, settings: &PipelineSettings) -> Result<()> {
        let topic_len = self.topic.chars().count();
        if topic_len < settings.min_topic_chars || topic_len > settings.max_topic_chars {
            return Err(Error::validation(format!(
                "Topic must be between {} and {} characters, got {}",
                settings.min_topic_chars, settings.max_topic_chars, topic_len
            )));
        }
        if self.target_length < settings.min_target_words
            || self.target_length > settings.max_target_words
        {
            return Err(Error::validation(format!(
                "Target length must be between {} and {} words, got {}",
                settings.min_target_words, settings.max_target_words, self.target_length
            )));
        }
        if let Some(max) = self.max_refinements {
            if max > settings.max_refinements {
                return Err(Error::validation(format!(
                    "Max refinements {} exceeds the configured maximum {}",
                    max, settings.max_refinements
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`TaskInput`]
#[derive(Debug, Clone, Default)]
pub struct TaskInputBuilder {
    topic: Option<String>,
    target_length: Option<u32>,
    style: ContentStyle,
    keywords: Vec<String>,
    stage_models: HashMap<Stage, String>,
    quality_threshold: Option<f64>,
    max_refinements: Option<u32>,
    budget_ceiling: Option<f64>,
}

impl TaskInputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn target_length(mut self, words: u32) -> Self {
        self.target_length = Some(words);
        self
    }

    pub fn style(mut self, style: ContentStyle) -> Self {
        self.style = style;
        self
    }

    pub fn keyword<S: Into<String>>(mut self, keyword: S) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Prefer a specific backend for one stage
    pub fn stage_model<S: Into<String>>(mut self, stage: Stage, backend_id: S) -> Self {
        self.stage_models.insert(stage, backend_id.into());
        self
    }

    pub fn quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = Some(threshold);
        self
    }

    pub fn max_refinements(mut self, max: u32) -> Self {
        self.max_refinements = Some(max);
        self
    }

    pub fn budget_ceiling(mut self, ceiling: f64) -> Self {
        self.budget_ceiling = Some(ceiling);
        self
    }

    /// Build the input, normalising topic and keywords
    pub fn build(self) -> Result<TaskInput> {
        let topic = self
            .topic
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::validation("Topic is required"))?;

        let target_length = self.target_length.unwrap_or(800);
        if target_length == 0 {
            return Err(Error::validation("Target length must be positive"));
        }

        let quality_threshold = self.quality_threshold.unwrap_or(DEFAULT_QUALITY_THRESHOLD);
        if !(0.0..=1.0).contains(&quality_threshold) || quality_threshold.is_nan() {
            return Err(Error::validation(format!(
                "Quality threshold must be within [0, 1], got {}",
                quality_threshold
            )));
        }

        if let Some(ceiling) = self.budget_ceiling {
            if ceiling.is_nan() || ceiling <= 0.0 {
                return Err(Error::validation("Budget ceiling must be positive"));
            }
        }

        let mut keywords: Vec<String> = Vec::new();
        for keyword in self.keywords {
            let keyword = keyword.trim().to_string();
            if keyword.is_empty() {
                return Err(Error::validation("Keywords cannot be empty"));
            }
            if !keywords.iter().any(|k| k.eq_ignore_ascii_case(&keyword)) {
                keywords.push(keyword);
            }
        }
        if keywords.len() > MAX_KEYWORDS {
            return Err(Error::validation(format!(
                "At most {} keywords are allowed",
                MAX_KEYWORDS
            )));
        }

        for (stage, backend) in &self.stage_models {
            if backend.trim().is_empty() {
                return Err(Error::validation(format!(
                    "Model preference for stage {} cannot be empty",
                    stage
                )));
            }
        }

        Ok(TaskInput {
            topic,
            target_length,
            style: self.style,
            keywords,
            stage_models: self.stage_models,
            quality_threshold,
            max_refinements: self.max_refinements,
            budget_ceiling: self.budget_ceiling,
        })
    }
}

/// One quality evaluation kept on the task for audit and training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub revision: u32,
    pub score: f64,
    pub passed: bool,
    pub feedback: Vec<Feedback>,
    pub evaluated_at: DateTime<Utc>,
}

/// Outputs produced by the stages so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageOutputs {
    pub research_notes: Option<String>,
    pub draft: Option<String>,
    /// Feedback of the latest failed evaluation, injected into the next draft
    pub feedback: Vec<Feedback>,
    pub evaluations: Vec<EvaluationRecord>,
    pub asset: Option<AssetReference>,
    pub formatted: Option<FormattedContent>,
}

/// The central entity of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTask {
    pub id: Uuid,
    pub input: TaskInput,
    pub status: TaskStatus,
    pub outputs: StageOutputs,
    pub quality_score: Option<f64>,
    pub refinement_count: u32,
    pub cost_accumulated: f64,
    pub approval_status: ApprovalStatus,
    pub reviewer_id: Option<String>,
    pub reviewer_feedback: Option<String>,
    pub decision_timestamp: Option<DateTime<Utc>>,
    pub publication: Option<PublishReceipt>,
    pub failure: Option<FailureReason>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ContentTask {
    /// Create a new task in `created`
    pub fn new(input: TaskInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            input,
            status: TaskStatus::Created,
            outputs: StageOutputs::default(),
            quality_score: None,
            refinement_count: 0,
            cost_accumulated: 0.0,
            approval_status: ApprovalStatus::Pending,
            reviewer_id: None,
            reviewer_feedback: None,
            decision_timestamp: None,
            publication: None,
            failure: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, enforcing the transition table
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::state_transition(format!(
                "Cannot move task {} from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        let now = Utc::now();
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Enter a failure state with a structured reason
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        let next = match reason {
            FailureReason::QualityNotMet { .. } => TaskStatus::FailedQuality,
            _ => TaskStatus::FailedError,
        };
        self.transition_to(next)?;
        self.failure = Some(reason);
        Ok(())
    }

    /// Refinement ceiling for this task, capped by configuration
    pub fn max_refinements(&self, configured: u32) -> u32 {
        self.input
            .max_refinements
            .map(|max| max.min(configured))
            .unwrap_or(configured)
    }

    /// Revision number of the current draft (1 for the first draft)
    pub fn revision(&self) -> u32 {
        self.refinement_count + 1
    }

    /// Store an evaluation outcome on the task
    pub fn record_evaluation(&mut self, evaluation: &Evaluation) {
        self.quality_score = Some(evaluation.score);
        self.outputs.evaluations.push(EvaluationRecord {
            revision: self.revision(),
            score: evaluation.score,
            passed: evaluation.passed,
            feedback: evaluation.feedback.clone(),
            evaluated_at: Utc::now(),
        });
        self.outputs.feedback = if evaluation.passed {
            Vec::new()
        } else {
            evaluation.feedback.clone()
        };
        self.updated_at = Utc::now();
    }

    /// Best score seen across all revisions
    pub fn best_score(&self) -> f64 {
        self.outputs
            .evaluations
            .iter()
            .map(|e| e.score)
            .fold(0.0, f64::max)
    }

    /// Record a human decision; only valid once, in `awaiting_approval`
    pub fn apply_decision(
        &mut self,
        approved: bool,
        reviewer_id: &str,
        feedback: Option<String>,
    ) -> Result<()> {
        if self.approval_status.is_decided() {
            return Err(Error::precondition(
                "decide",
                format!(
                    "task {} was already {}",
                    self.id,
                    self.approval_status.as_str()
                ),
            ));
        }
        if self.status != TaskStatus::AwaitingApproval {
            return Err(Error::precondition(
                "decide",
                format!(
                    "task {} is in {}, not awaiting_approval",
                    self.id, self.status
                ),
            ));
        }
        if reviewer_id.trim().is_empty() {
            return Err(Error::validation("Reviewer id is required"));
        }

        let (approval, next) = if approved {
            (ApprovalStatus::Approved, TaskStatus::Publishing)
        } else {
            (ApprovalStatus::Rejected, TaskStatus::Rejected)
        };
        self.transition_to(next)?;
        self.approval_status = approval;
        self.reviewer_id = Some(reviewer_id.trim().to_string());
        self.reviewer_feedback = feedback;
        self.decision_timestamp = Some(Utc::now());
        Ok(())
    }

    /// Complete a publication started by an approval
    pub fn mark_published(&mut self, receipt: PublishReceipt) -> Result<()> {
        if self.approval_status != ApprovalStatus::Approved {
            return Err(Error::state_transition(format!(
                "Task {} cannot be published without approval",
                self.id
            )));
        }
        self.transition_to(TaskStatus::Published)?;
        self.publication = Some(receipt);
        Ok(())
    }

    /// Cancellation is allowed only while the driver owns the task
    pub fn can_cancel(&self) -> bool {
        self.status.is_machine_driven()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{CriterionKind, Evaluation, Feedback};

    fn input() -> TaskInput {
        TaskInput::builder()
            .topic("renewable energy incentives")
            .target_length(800)
            .keyword("solar")
            .build()
            .unwrap()
    }

    fn task_in(status: TaskStatus) -> ContentTask {
        let mut task = ContentTask::new(input());
        task.status = status;
        task
    }

    #[test]
    fn test_input_builder_normalises() {
        let input = TaskInput::builder()
            .topic("  heat pumps  ")
            .keyword("Efficiency")
            .keyword("efficiency")
            .keyword(" grants ")
            .build()
            .unwrap();

        assert_eq!(input.topic, "heat pumps");
        assert_eq!(input.keywords, vec!["Efficiency", "grants"]);
        assert_eq!(input.quality_threshold, DEFAULT_QUALITY_THRESHOLD);
        assert_eq!(input.style, ContentStyle::Informative);
    }

    #[test]
    fn test_input_builder_rejects_bad_values() {
        assert!(TaskInput::builder().build().is_err());
        assert!(TaskInput::builder().topic("   ").build().is_err());
        assert!(TaskInput::builder()
            .topic("valid topic")
            .quality_threshold(1.5)
            .build()
            .is_err());
        assert!(TaskInput::builder()
            .topic("valid topic")
            .keyword("")
            .build()
            .is_err());
        assert!(TaskInput::builder()
            .topic("valid topic")
            .budget_ceiling(0.0)
            .build()
            .is_err());
    }

    #[test]
    fn test_input_bounds_against_settings() {
        let settings = PipelineSettings::default();
        assert!(input().validate_against(&settings).is_ok());

        let short = TaskInput::builder().topic("ai").build().unwrap();
        assert!(short.validate_against(&settings).is_err());

        let long = TaskInput::builder()
            .topic("x".repeat(settings.max_topic_chars + 1))
            .build()
            .unwrap();
        assert!(long.validate_against(&settings).is_err());

        let tiny = TaskInput::builder()
            .topic("valid topic")
            .target_length(10)
            .build()
            .unwrap();
        assert!(tiny.validate_against(&settings).is_err());

        let greedy = TaskInput::builder()
            .topic("valid topic")
            .max_refinements(settings.max_refinements + 1)
            .build()
            .unwrap();
        assert!(greedy.validate_against(&settings).is_err());
    }

    #[test]
    fn test_forward_transitions() {
        let mut task = ContentTask::new(input());
        for next in [
            TaskStatus::Researching,
            TaskStatus::Drafting,
            TaskStatus::QaReview,
            TaskStatus::Refining,
            TaskStatus::QaReview,
            TaskStatus::AssetSelection,
            TaskStatus::Formatting,
            TaskStatus::AwaitingApproval,
        ] {
            task.transition_to(next).unwrap();
        }
        assert_eq!(task.status, TaskStatus::AwaitingApproval);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_backward_transitions_rejected() {
        let mut task = task_in(TaskStatus::Formatting);
        assert!(task.transition_to(TaskStatus::Drafting).is_err());

        let mut task = task_in(TaskStatus::AssetSelection);
        assert!(task.transition_to(TaskStatus::Refining).is_err());

        let mut task = task_in(TaskStatus::Published);
        assert!(task.transition_to(TaskStatus::FailedError).is_err());
    }

    #[test]
    fn test_awaiting_approval_cannot_fail_or_cancel() {
        let mut task = task_in(TaskStatus::AwaitingApproval);
        assert!(!task.can_cancel());
        assert!(task.fail(FailureReason::Cancelled).is_err());
        assert_eq!(task.status, TaskStatus::AwaitingApproval);
    }

    #[test]
    fn test_fail_sets_reason_and_completion() {
        let mut task = task_in(TaskStatus::Drafting);
        task.fail(FailureReason::BudgetExceeded {
            spent: 0.8,
            ceiling: 1.0,
        })
        .unwrap();
        assert_eq!(task.status, TaskStatus::FailedError);
        assert!(task.completed_at.is_some());
        assert_eq!(task.failure.as_ref().unwrap().code(), "budget_exceeded");

        let mut task = task_in(TaskStatus::QaReview);
        task.fail(FailureReason::QualityNotMet {
            best_score: 0.5,
            refinements: 3,
        })
        .unwrap();
        assert_eq!(task.status, TaskStatus::FailedQuality);
    }

    #[test]
    fn test_decision_is_write_once() {
        let mut task = task_in(TaskStatus::AwaitingApproval);
        task.apply_decision(false, "editor-1", Some("too shallow".into()))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Rejected);
        assert_eq!(task.approval_status, ApprovalStatus::Rejected);
        assert_eq!(task.reviewer_feedback.as_deref(), Some("too shallow"));

        let err = task.apply_decision(true, "editor-2", None).unwrap_err();
        assert_eq!(err.category(), "precondition");
        assert_eq!(task.approval_status, ApprovalStatus::Rejected);
        assert_eq!(task.reviewer_id.as_deref(), Some("editor-1"));
    }

    #[test]
    fn test_decision_requires_awaiting_approval() {
        let mut task = task_in(TaskStatus::Formatting);
        let err = task.apply_decision(true, "editor", None).unwrap_err();
        assert_eq!(err.category(), "precondition");
        assert_eq!(task.approval_status, ApprovalStatus::Pending);
    }

    #[test]
    fn test_publish_requires_approval() {
        let mut task = task_in(TaskStatus::Publishing);
        let receipt = PublishReceipt {
            external_id: "ext-1".into(),
            url: "file:///tmp/ext-1.md".into(),
            published_at: Utc::now(),
        };
        assert!(task.mark_published(receipt.clone()).is_err());

        task.approval_status = ApprovalStatus::Approved;
        task.mark_published(receipt).unwrap();
        assert_eq!(task.status, TaskStatus::Published);
    }

    #[test]
    fn test_record_evaluation_tracks_feedback() {
        let mut task = task_in(TaskStatus::QaReview);
        let failing = Evaluation {
            score: 0.6,
            passed: false,
            criteria: Vec::new(),
            feedback: vec![Feedback::new(CriterionKind::Structure, "add headings")],
        };
        task.record_evaluation(&failing);
        assert_eq!(task.quality_score, Some(0.6));
        assert_eq!(task.outputs.feedback.len(), 1);
        assert_eq!(task.outputs.evaluations[0].revision, 1);

        task.refinement_count = 1;
        let passing = Evaluation {
            score: 0.9,
            passed: true,
            criteria: Vec::new(),
            feedback: Vec::new(),
        };
        task.record_evaluation(&passing);
        assert!(task.outputs.feedback.is_empty());
        assert_eq!(task.outputs.evaluations[1].revision, 2);
        assert_eq!(task.best_score(), 0.9);
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_max_refinements_is_capped() {
        let mut task = ContentTask::new(input());
        assert_eq!(task.max_refinements(3), 3);
        task.input.max_refinements = Some(1);
        assert_eq!(task.max_refinements(3), 1);
        task.input.max_refinements = Some(5);
        assert_eq!(task.max_refinements(3), 3);
    }
}
