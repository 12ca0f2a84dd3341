//! Quality rubric, evaluation results and the evaluator seam
//!
//! A [`Rubric`] is a fixed, ordered list of weighted criteria. Evaluators
//! produce one [`CriterionScore`] per criterion and the rubric aggregates them:
//! the aggregate is the weighted average, and a draft passes only when the
//! aggregate reaches the threshold and no criterion falls below the hard floor.

use crate::budget::CostLedger;
use crate::task::ContentStyle;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scores closer than this compare as equal
pub const SCORE_EPSILON: f64 = 1e-9;

/// Named rubric criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    Clarity,
    FactualConsistency,
    Structure,
    ToneMatch,
    LengthCompliance,
    KeywordCoverage,
    Originality,
}

impl CriterionKind {
    /// Default rubric order
    pub const ALL: [CriterionKind; 7] = [
        CriterionKind::Clarity,
        CriterionKind::FactualConsistency,
        CriterionKind::Structure,
        CriterionKind::ToneMatch,
        CriterionKind::LengthCompliance,
        CriterionKind::KeywordCoverage,
        CriterionKind::Originality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CriterionKind::Clarity => "clarity",
            CriterionKind::FactualConsistency => "factual_consistency",
            CriterionKind::Structure => "structure",
            CriterionKind::ToneMatch => "tone_match",
            CriterionKind::LengthCompliance => "length_compliance",
            CriterionKind::KeywordCoverage => "keyword_coverage",
            CriterionKind::Originality => "originality",
        }
    }

    /// Actionable note used when an evaluator gives none
    pub fn default_note(&self) -> &'static str {
        match self {
            CriterionKind::Clarity => "Shorten long sentences and define jargon on first use.",
            CriterionKind::FactualConsistency => {
                "Align every claim with the research notes and remove unsupported statements."
            }
            CriterionKind::Structure => {
                "Organise the article under descriptive headings with an introduction and conclusion."
            }
            CriterionKind::ToneMatch => "Rewrite passages that drift from the requested style.",
            CriterionKind::LengthCompliance => "Bring the article closer to the target word count.",
            CriterionKind::KeywordCoverage => "Work the missing keywords naturally into the text.",
            CriterionKind::Originality => "Remove repeated sentences and restated paragraphs.",
        }
    }
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CriterionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CriterionKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| Error::validation(format!("unknown rubric criterion '{}'", s)))
    }
}

/// A weighted rubric entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub kind: CriterionKind,
    pub weight: f64,
}

/// Ordered, weighted rubric with a hard per-criterion floor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    criteria: Vec<Criterion>,
    hard_floor: f64,
}

impl Rubric {
    pub fn new(criteria: Vec<Criterion>, hard_floor: f64) -> Result<Self> {
        if criteria.is_empty() {
            return Err(Error::configuration("Rubric needs at least one criterion"));
        }
        if !(0.0..=1.0).contains(&hard_floor) {
            return Err(Error::configuration(format!(
                "Rubric hard floor must be within [0, 1], got {}",
                hard_floor
            )));
        }
        for (i, criterion) in criteria.iter().enumerate() {
            if criterion.weight <= 0.0 || !criterion.weight.is_finite() {
                return Err(Error::configuration(format!(
                    "Weight of {} must be positive",
                    criterion.kind
                )));
            }
            if criteria[..i].iter().any(|c| c.kind == criterion.kind) {
                return Err(Error::configuration(format!(
                    "Criterion {} listed twice",
                    criterion.kind
                )));
            }
        }
        Ok(Self {
            criteria,
            hard_floor,
        })
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn hard_floor(&self) -> f64 {
        self.hard_floor
    }

    pub fn contains(&self, kind: CriterionKind) -> bool {
        self.criteria.iter().any(|c| c.kind == kind)
    }

    /// Combine per-criterion scores into a pass/fail evaluation
    ///
    /// Every rubric criterion must be scored; a missing score means the
    /// evaluator could not judge the text and surfaces as a transient error.
    pub fn aggregate(&self, scores: &[CriterionScore], threshold: f64) -> Result<Evaluation> {
        let mut ordered = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            let found = scores
                .iter()
                .find(|s| s.criterion == criterion.kind)
                .ok_or_else(|| {
                    Error::backend("evaluator", format!("no score produced for {}", criterion.kind))
                })?;
            if !found.score.is_finite() {
                return Err(Error::backend(
                    "evaluator",
                    format!("non-numeric score for {}", criterion.kind),
                ));
            }
            ordered.push(CriterionScore {
                criterion: criterion.kind,
                score: found.score.clamp(0.0, 1.0),
                note: found.note.clone(),
            });
        }

        let total_weight: f64 = self.criteria.iter().map(|c| c.weight).sum();
        let weighted: f64 = self
            .criteria
            .iter()
            .zip(&ordered)
            .map(|(c, s)| c.weight * s.score)
            .sum();
        let score = round_score(weighted / total_weight).clamp(0.0, 1.0);

        let below = |value: f64, bound: f64| value + SCORE_EPSILON < bound;
        let below_floor = ordered.iter().any(|s| below(s.score, self.hard_floor));
        let passed = !below(score, threshold) && !below_floor;

        let feedback = ordered
            .iter()
            .filter(|s| below(s.score, threshold) || below(s.score, self.hard_floor))
            .map(|s| Feedback {
                criterion: s.criterion,
                note: s
                    .note
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| s.criterion.default_note().to_string()),
            })
            .collect();

        Ok(Evaluation {
            score,
            passed,
            criteria: ordered,
            feedback,
        })
    }
}

fn round_score(score: f64) -> f64 {
    const SCALE: f64 = 1e9;
    (score * SCALE).round() / SCALE
}

impl Default for Rubric {
    fn default() -> Self {
        let weights = [0.2, 0.2, 0.15, 0.15, 0.1, 0.1, 0.1];
        Self {
            criteria: CriterionKind::ALL
                .iter()
                .zip(weights)
                .map(|(kind, weight)| Criterion {
                    kind: *kind,
                    weight,
                })
                .collect(),
            hard_floor: 0.3,
        }
    }
}

/// Score of a single criterion in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: CriterionKind,
    pub score: f64,
    pub note: Option<String>,
}

impl CriterionScore {
    pub fn new(criterion: CriterionKind, score: f64) -> Self {
        Self {
            criterion,
            score,
            note: None,
        }
    }

    pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Criterion-keyed, actionable refinement note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub criterion: CriterionKind,
    pub note: String,
}

impl Feedback {
    pub fn new<S: Into<String>>(criterion: CriterionKind, note: S) -> Self {
        Self {
            criterion,
            note: note.into(),
        }
    }
}

/// Render feedback as a deterministic bullet list for prompts
pub fn render_feedback(feedback: &[Feedback]) -> String {
    feedback
        .iter()
        .map(|f| format!("- [{}] {}", f.criterion, f.note))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of evaluating one draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub passed: bool,
    pub criteria: Vec<CriterionScore>,
    pub feedback: Vec<Feedback>,
}

/// What the evaluator needs to know about the request
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub topic: String,
    pub target_length: u32,
    pub style: ContentStyle,
    pub keywords: Vec<String>,
    pub research_notes: Option<String>,
    pub threshold: f64,
    /// Backend the task asked to review with, if any
    pub preferred_backend: Option<String>,
}

/// Scores candidate text against a rubric
///
/// Implementations that call model backends charge the ledger; an evaluator
/// that cannot produce a score returns an error, never a pass.
#[async_trait]
pub trait QualityEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        text: &str,
        rubric: &Rubric,
        context: &EvaluationContext,
        ledger: &mut CostLedger,
    ) -> Result<Evaluation>;
}
