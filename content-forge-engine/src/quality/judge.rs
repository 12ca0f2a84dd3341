//! Model-judged quality evaluation
//!
//! A routed judge backend scores the criteria that need reading
//! comprehension; measurable criteria come from the heuristic scorer. A judge
//! answer that cannot be parsed, or that leaves a rubric criterion unscored,
//! is a transient failure and never a pass.

use super::heuristic::HeuristicEvaluator;
use crate::routing::ModelRouter;
use async_trait::async_trait;
use content_forge_core::backend::GenerationParams;
use content_forge_core::budget::CostLedger;
use content_forge_core::quality::{
    CriterionKind, CriterionScore, Evaluation, EvaluationContext, QualityEvaluator, Rubric,
};
use content_forge_core::task::Stage;
use content_forge_core::{Error, Result};
use content_forge_prompts::PromptLibrary;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const JUDGE_SYSTEM_PROMPT: &str =
    "You are a meticulous editor. Answer with JSON only, without commentary or code fences.";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Verdict {
    Detailed {
        score: f64,
        #[serde(default)]
        note: Option<String>,
    },
    Bare(f64),
}

/// Evaluator combining a judge model with deterministic measurements
pub struct ModelJudgeEvaluator {
    router: Arc<ModelRouter>,
    prompts: Arc<PromptLibrary>,
    heuristic: HeuristicEvaluator,
}

impl ModelJudgeEvaluator {
    pub fn new(router: Arc<ModelRouter>, prompts: Arc<PromptLibrary>) -> Self {
        Self {
            router,
            prompts,
            heuristic: HeuristicEvaluator::new(),
        }
    }
}

#[async_trait]
impl QualityEvaluator for ModelJudgeEvaluator {
    async fn evaluate(
        &self,
        text: &str,
        rubric: &Rubric,
        context: &EvaluationContext,
        ledger: &mut CostLedger,
    ) -> Result<Evaluation> {
        let prompt = self.prompts.judge(text, rubric, context)?;
        let params = GenerationParams {
            max_tokens: 1024,
            temperature: 0.0,
            system: Some(JUDGE_SYSTEM_PROMPT.to_string()),
        };
        let generation = self
            .router
            .generate(
                Stage::QualityReview,
                &prompt,
                &params,
                context.preferred_backend.as_deref(),
                ledger,
            )
            .await?;

        let judged = parse_verdicts(&generation.text).map_err(|reason| {
            warn!(backend_id = %generation.backend_id, "Unusable judge output: {}", reason);
            Error::backend(generation.backend_id.clone(), reason)
        })?;
        debug!(
            backend_id = %generation.backend_id,
            judged = judged.len(),
            "Judge returned criterion scores"
        );

        let scores = merge_scores(self.heuristic.score(text, context), judged);
        rubric.aggregate(&scores, context.threshold)
    }
}

/// Extract criterion scores from the judge's answer
///
/// Tolerates prose or code fences around the JSON object; unknown criterion
/// names are ignored.
pub fn parse_verdicts(raw: &str) -> std::result::Result<Vec<CriterionScore>, String> {
    let start = raw.find('{').ok_or("judge output contains no JSON object")?;
    let end = raw.rfind('}').ok_or("judge output contains no JSON object")?;
    if end < start {
        return Err("judge output contains no JSON object".to_string());
    }

    let verdicts: HashMap<String, Verdict> = serde_json::from_str(&raw[start..=end])
        .map_err(|e| format!("judge output is not a criterion map: {}", e))?;

    let mut scores: Vec<CriterionScore> = verdicts
        .into_iter()
        .filter_map(|(name, verdict)| {
            let kind = name.trim().to_lowercase().parse::<CriterionKind>().ok()?;
            Some(match verdict {
                Verdict::Detailed { score, note } => CriterionScore {
                    criterion: kind,
                    score,
                    note: note.filter(|n| !n.trim().is_empty()),
                },
                Verdict::Bare(score) => CriterionScore::new(kind, score),
            })
        })
        .collect();

    if scores.is_empty() {
        return Err("judge output scored no known criterion".to_string());
    }
    scores.sort_by_key(|s| CriterionKind::ALL.iter().position(|k| *k == s.criterion));
    Ok(scores)
}

/// Measured criteria come from the heuristic, the rest from the judge
fn merge_scores(measured: Vec<CriterionScore>, judged: Vec<CriterionScore>) -> Vec<CriterionScore> {
    let mut merged: Vec<CriterionScore> = measured
        .into_iter()
        .filter(|s| HeuristicEvaluator::measures(s.criterion))
        .collect();
    merged.extend(
        judged
            .into_iter()
            .filter(|s| !HeuristicEvaluator::measures(s.criterion)),
    );
    merged
}
