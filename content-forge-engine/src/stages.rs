//! Stage executors
//!
//! Each machine-driven status has one executor. An executor reads the task,
//! does its work (routed generation, evaluation or asset lookup), and returns
//! a copy of the task already moved to its next status. Nothing is persisted
//! here; the orchestrator commits the result.

use crate::routing::{Generation, ModelRouter};
use content_forge_core::backend::GenerationParams;
use content_forge_core::budget::CostLedger;
use content_forge_core::collaborators::{AssetSelector, FormattedContent};
use content_forge_core::config::PipelineSettings;
use content_forge_core::quality::{EvaluationContext, QualityEvaluator, Rubric};
use content_forge_core::task::{ContentTask, FailureReason, Stage, TaskStatus};
use content_forge_core::{Error, Result};
use content_forge_prompts::PromptLibrary;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Longest slug produced by the format stage
pub const MAX_SLUG_CHARS: usize = 80;

/// Longest summary derived when the formatter returns plain text
pub const MAX_SUMMARY_CHARS: usize = 200;

/// Outcome of one successful stage execution
#[derive(Debug, Clone)]
pub struct StageResult {
    /// The task after the stage, already in its next status
    pub task: ContentTask,
    pub backend_id: Option<String>,
    pub cost: f64,
    pub output: Option<String>,
    /// Backends the router tried for this stage
    pub attempts: u32,
    pub note: Option<String>,
}

impl StageResult {
    fn new(task: ContentTask) -> Self {
        Self {
            task,
            backend_id: None,
            cost: 0.0,
            output: None,
            attempts: 0,
            note: None,
        }
    }

    fn generated(task: ContentTask, generation: &Generation) -> Self {
        let note = generation
            .used_fallback()
            .then(|| format!("served after {} backend attempts", generation.attempts));
        Self {
            task,
            backend_id: Some(generation.backend_id.clone()),
            cost: generation.cost,
            output: Some(generation.text.clone()),
            attempts: generation.attempts,
            note,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FormatReply {
    title: String,
    #[serde(default)]
    summary: String,
    body_markdown: String,
}

/// Runs the work of each pipeline stage
pub struct StageExecutors {
    router: Arc<ModelRouter>,
    prompts: Arc<PromptLibrary>,
    evaluator: Arc<dyn QualityEvaluator>,
    assets: Arc<dyn AssetSelector>,
    rubric: Rubric,
    settings: Arc<PipelineSettings>,
}

impl StageExecutors {
    pub fn new(
        router: Arc<ModelRouter>,
        prompts: Arc<PromptLibrary>,
        evaluator: Arc<dyn QualityEvaluator>,
        assets: Arc<dyn AssetSelector>,
        rubric: Rubric,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        Self {
            router,
            prompts,
            evaluator,
            assets,
            rubric,
            settings,
        }
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// Execute one stage against a snapshot of the task
    pub async fn execute(
        &self,
        stage: Stage,
        task: &ContentTask,
        ledger: &mut CostLedger,
    ) -> Result<StageResult> {
        debug!(task_id = %task.id, stage = %stage, "Executing stage");
        match stage {
            Stage::Research => self.research(task, ledger).await,
            Stage::Draft => self.draft(task, ledger).await,
            Stage::QualityReview => self.review(task, ledger).await,
            Stage::Refine => self.refine(task, ledger).await,
            Stage::AssetSelection => self.select_asset(task).await,
            Stage::Format => self.format(task, ledger).await,
            Stage::Approval | Stage::Publish => Err(Error::precondition(
                "execute",
                format!("{} is not a machine-driven stage", stage),
            )),
        }
    }

    async fn generate(
        &self,
        stage: Stage,
        task: &ContentTask,
        prompt: &str,
        ledger: &mut CostLedger,
    ) -> Result<Generation> {
        let preference = task.input.stage_models.get(&stage).map(String::as_str);
        let params = params_for(stage, task.input.target_length);
        self.router
            .generate(stage, prompt, &params, preference, ledger)
            .await
    }

    async fn research(&self, task: &ContentTask, ledger: &mut CostLedger) -> Result<StageResult> {
        let prompt = self.prompts.research(task)?;
        let generation = self.generate(Stage::Research, task, &prompt, ledger).await?;

        let mut next = task.clone();
        next.outputs.research_notes = Some(generation.text.clone());
        next.transition_to(TaskStatus::Drafting)?;
        Ok(StageResult::generated(next, &generation))
    }

    async fn draft(&self, task: &ContentTask, ledger: &mut CostLedger) -> Result<StageResult> {
        let prompt = self.prompts.draft(task)?;
        let generation = self.generate(Stage::Draft, task, &prompt, ledger).await?;

        let mut next = task.clone();
        next.outputs.draft = Some(generation.text.clone());
        next.transition_to(TaskStatus::QaReview)?;
        Ok(StageResult::generated(next, &generation))
    }

    async fn refine(&self, task: &ContentTask, ledger: &mut CostLedger) -> Result<StageResult> {
        let prompt = self.prompts.refine(task)?;
        let generation = self.generate(Stage::Refine, task, &prompt, ledger).await?;

        let mut next = task.clone();
        next.outputs.draft = Some(generation.text.clone());
        next.transition_to(TaskStatus::QaReview)?;
        let mut result = StageResult::generated(next, &generation);
        result.note.get_or_insert_with(|| format!("revision {}", task.revision()));
        Ok(result)
    }

    /// Evaluate the current draft and decide between pass, refine and give up
    async fn review(&self, task: &ContentTask, ledger: &mut CostLedger) -> Result<StageResult> {
        let draft = task.outputs.draft.as_deref().ok_or_else(|| {
            Error::precondition("quality_review", "task has no draft to evaluate")
        })?;
        let context = EvaluationContext {
            topic: task.input.topic.clone(),
            target_length: task.input.target_length,
            style: task.input.style,
            keywords: task.input.keywords.clone(),
            research_notes: task.outputs.research_notes.clone(),
            threshold: task.input.quality_threshold,
            preferred_backend: task.input.stage_models.get(&Stage::QualityReview).cloned(),
        };

        let spent_before = ledger.spent();
        let evaluation = self
            .evaluator
            .evaluate(draft, &self.rubric, &context, ledger)
            .await?;

        let mut next = task.clone();
        next.record_evaluation(&evaluation);
        let max_refinements = task.max_refinements(self.settings.max_refinements);
        let note = if evaluation.passed {
            next.transition_to(TaskStatus::AssetSelection)?;
            format!("passed with {:.3}", evaluation.score)
        } else if next.refinement_count < max_refinements {
            next.refinement_count += 1;
            next.transition_to(TaskStatus::Refining)?;
            format!(
                "scored {:.3} below {:.2}, refinement {} of {}",
                evaluation.score, context.threshold, next.refinement_count, max_refinements
            )
        } else {
            let best_score = next.best_score();
            next.fail(FailureReason::QualityNotMet {
                best_score,
                refinements: next.refinement_count,
            })?;
            format!(
                "scored {:.3} below {:.2} with no refinements left",
                evaluation.score, context.threshold
            )
        };
        info!(
            task_id = %task.id,
            revision = task.revision(),
            score = evaluation.score,
            passed = evaluation.passed,
            next = %next.status,
            "Quality review complete"
        );

        let mut result = StageResult::new(next);
        result.cost = ledger.spent() - spent_before;
        result.output = Some(serde_json::to_string(&evaluation)?);
        result.note = Some(note);
        Ok(result)
    }

    /// Asset lookup never fails the task; errors and timeouts mean no asset
    async fn select_asset(&self, task: &ContentTask) -> Result<StageResult> {
        let lookup = self
            .assets
            .select_asset(&task.input.topic, &task.input.keywords);
        let (asset, note) = match timeout(self.settings.asset_timeout(), lookup).await {
            Ok(Ok(Some(asset))) => {
                let note = format!("selected asset {}", asset.id);
                (Some(asset), note)
            }
            Ok(Ok(None)) => (None, "no matching asset".to_string()),
            Ok(Err(e)) => {
                warn!(task_id = %task.id, "Asset selection failed, continuing without one: {}", e);
                (None, format!("asset selection failed: {}", e))
            }
            Err(_) => {
                warn!(
                    task_id = %task.id,
                    timeout_secs = self.settings.asset_timeout_secs,
                    "Asset selection timed out, continuing without one"
                );
                (None, "asset selection timed out".to_string())
            }
        };

        let mut next = task.clone();
        next.outputs.asset = asset;
        next.transition_to(TaskStatus::Formatting)?;
        let mut result = StageResult::new(next);
        result.note = Some(note);
        Ok(result)
    }

    async fn format(&self, task: &ContentTask, ledger: &mut CostLedger) -> Result<StageResult> {
        let prompt = self.prompts.format(task)?;
        let generation = self.generate(Stage::Format, task, &prompt, ledger).await?;
        let draft = task.outputs.draft.as_deref().unwrap_or_default();

        let formatted = parse_formatted(&generation.text, &task.input.topic, draft);
        let mut next = task.clone();
        next.outputs.formatted = Some(formatted);
        next.transition_to(TaskStatus::AwaitingApproval)?;
        Ok(StageResult::generated(next, &generation))
    }
}

/// Sampling parameters per stage, sized to the requested length
pub fn params_for(stage: Stage, target_length: u32) -> GenerationParams {
    let article_tokens = target_length.saturating_mul(2).clamp(512, 16_000);
    let (temperature, max_tokens) = match stage {
        Stage::Research => (0.3, 1_500),
        Stage::Draft => (0.7, article_tokens),
        Stage::Refine => (0.6, article_tokens),
        Stage::Format => (0.2, article_tokens.saturating_add(512)),
        _ => (0.0, 1_024),
    };
    GenerationParams {
        max_tokens,
        temperature,
        system: None,
    }
}

/// Turn the formatter's reply into publishable content
///
/// A JSON object with `title`, `summary` and `body_markdown` is used as is.
/// Anything else is treated as the article body, with the title taken from
/// its first heading and the summary from its first paragraph.
pub fn parse_formatted(reply: &str, topic: &str, draft: &str) -> FormattedContent {
    let structured = reply
        .find('{')
        .zip(reply.rfind('}'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| serde_json::from_str::<FormatReply>(&reply[start..=end]).ok())
        .filter(|r| !r.title.trim().is_empty() && !r.body_markdown.trim().is_empty());

    let (title, summary, body) = match structured {
        Some(reply) => {
            let summary = if reply.summary.trim().is_empty() {
                first_paragraph(&reply.body_markdown)
            } else {
                reply.summary.trim().to_string()
            };
            (reply.title.trim().to_string(), summary, reply.body_markdown)
        }
        None => {
            let body = if reply.trim().is_empty() { draft } else { reply };
            let title = first_heading(body).unwrap_or_else(|| topic.to_string());
            (title, first_paragraph(body), body.trim().to_string())
        }
    };

    FormattedContent {
        slug: slugify(&title),
        word_count: count_words(&body),
        title,
        summary,
        body_markdown: body,
    }
}

/// Words of a markdown body, ignoring bare markup tokens
pub fn count_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .count()
}

fn first_heading(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|heading| !heading.is_empty())
}

fn first_paragraph(text: &str) -> String {
    let paragraph = text
        .split("\n\n")
        .map(str::trim)
        .find(|block| !block.is_empty() && !block.starts_with('#'))
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if paragraph.chars().count() <= MAX_SUMMARY_CHARS {
        return paragraph;
    }
    let cut: String = paragraph.chars().take(MAX_SUMMARY_CHARS).collect();
    match cut.rfind(' ') {
        Some(space) => format!("{}...", &cut[..space]),
        None => cut,
    }
}

/// Lowercase alphanumerics joined by single hyphens
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug: String = slug.chars().take(MAX_SLUG_CHARS).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "article".to_string()
    } else {
        slug
    }
}
