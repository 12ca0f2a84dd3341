//! Deterministic text measurements
//!
//! Scores the criteria that can be measured without a model: structure,
//! length compliance, keyword coverage, originality and clarity. Criteria it
//! cannot measure receive [`NEUTRAL_SCORE`].

use async_trait::async_trait;
use content_forge_core::budget::CostLedger;
use content_forge_core::quality::{
    CriterionKind, CriterionScore, Evaluation, EvaluationContext, QualityEvaluator, Rubric,
};
use content_forge_core::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Score given to criteria that need a judge
pub const NEUTRAL_SCORE: f64 = 0.75;

/// Criteria this module measures
pub const MEASURED: [CriterionKind; 5] = [
    CriterionKind::Clarity,
    CriterionKind::Structure,
    CriterionKind::LengthCompliance,
    CriterionKind::KeywordCoverage,
    CriterionKind::Originality,
];

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(\s+|$)").expect("Invalid sentence regex"));

/// Heuristic evaluator with no model calls
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEvaluator;

impl HeuristicEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn measures(kind: CriterionKind) -> bool {
        MEASURED.contains(&kind)
    }

    /// Score every criterion of the default order
    pub fn score(&self, text: &str, context: &EvaluationContext) -> Vec<CriterionScore> {
        let stats = TextStats::of(text);
        CriterionKind::ALL
            .iter()
            .map(|kind| match kind {
                CriterionKind::Structure => structure(&stats),
                CriterionKind::LengthCompliance => length_compliance(&stats, context.target_length),
                CriterionKind::KeywordCoverage => keyword_coverage(text, &context.keywords),
                CriterionKind::Originality => originality(&stats),
                CriterionKind::Clarity => clarity(&stats),
                other => CriterionScore::new(*other, NEUTRAL_SCORE),
            })
            .collect()
    }
}

#[async_trait]
impl QualityEvaluator for HeuristicEvaluator {
    async fn evaluate(
        &self,
        text: &str,
        rubric: &Rubric,
        context: &EvaluationContext,
        _ledger: &mut CostLedger,
    ) -> Result<Evaluation> {
        rubric.aggregate(&self.score(text, context), context.threshold)
    }
}

struct TextStats {
    words: usize,
    headings: usize,
    paragraphs: usize,
    sentences: Vec<String>,
}

impl TextStats {
    fn of(text: &str) -> Self {
        let mut headings = 0;
        let mut paragraphs = 0;
        let mut prose = String::new();
        for block in text.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
            for line in block.lines() {
                if line.trim_start().starts_with('#') {
                    headings += 1;
                } else {
                    prose.push_str(line);
                    prose.push(' ');
                }
            }
            if !block.lines().all(|l| l.trim_start().starts_with('#')) {
                paragraphs += 1;
            }
        }

        let sentences = SENTENCE_END
            .split(&prose)
            .map(normalize_sentence)
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            words: prose.split_whitespace().count(),
            headings,
            paragraphs,
            sentences,
        }
    }
}

fn normalize_sentence(sentence: &str) -> String {
    sentence
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn structure(stats: &TextStats) -> CriterionScore {
    let headings = (stats.headings.min(3) as f64) / 3.0;
    let paragraphs = (stats.paragraphs.min(5) as f64) / 5.0;
    let score = 0.5 * headings + 0.5 * paragraphs;
    let kind = CriterionKind::Structure;
    if stats.headings == 0 {
        CriterionScore::new(kind, score).with_note(
            "Add markdown headings that break the article into an introduction, body sections and a conclusion.",
        )
    } else if stats.paragraphs < 3 {
        CriterionScore::new(kind, score)
            .with_note("Split the text into more focused paragraphs.")
    } else {
        CriterionScore::new(kind, score)
    }
}

fn length_compliance(stats: &TextStats, target: u32) -> CriterionScore {
    let kind = CriterionKind::LengthCompliance;
    if target == 0 {
        return CriterionScore::new(kind, 1.0);
    }
    let ratio = stats.words as f64 / target as f64;
    let deviation = (1.0 - ratio).abs();
    // Within 10% of the target is full marks
    let score = (1.0 - (deviation - 0.1).max(0.0) * 1.25).clamp(0.0, 1.0);
    let note = format!(
        "The article has {} words against a target of {}; {} it accordingly.",
        stats.words,
        target,
        if ratio < 1.0 { "expand" } else { "tighten" }
    );
    CriterionScore::new(kind, score).with_note(note)
}

fn keyword_coverage(text: &str, keywords: &[String]) -> CriterionScore {
    let kind = CriterionKind::KeywordCoverage;
    if keywords.is_empty() {
        return CriterionScore::new(kind, 1.0);
    }
    let haystack = text.to_lowercase();
    let missing: Vec<&str> = keywords
        .iter()
        .filter(|k| !haystack.contains(&k.to_lowercase()))
        .map(String::as_str)
        .collect();
    let score = 1.0 - missing.len() as f64 / keywords.len() as f64;
    if missing.is_empty() {
        CriterionScore::new(kind, score)
    } else {
        CriterionScore::new(kind, score).with_note(format!(
            "Work the missing keywords into the text: {}.",
            missing.join(", ")
        ))
    }
}

fn originality(stats: &TextStats) -> CriterionScore {
    let kind = CriterionKind::Originality;
    if stats.sentences.is_empty() {
        return CriterionScore::new(kind, 0.0).with_note("The draft contains no prose.");
    }
    let unique: HashSet<&String> = stats.sentences.iter().collect();
    let duplicate_ratio = 1.0 - unique.len() as f64 / stats.sentences.len() as f64;
    let score = (1.0 - 2.0 * duplicate_ratio).clamp(0.0, 1.0);
    CriterionScore::new(kind, score)
}

fn clarity(stats: &TextStats) -> CriterionScore {
    let kind = CriterionKind::Clarity;
    if stats.sentences.is_empty() {
        return CriterionScore::new(kind, 0.0).with_note("The draft contains no prose.");
    }
    let average = stats.words as f64 / stats.sentences.len() as f64;
    let score = if average <= 20.0 {
        1.0
    } else {
        (1.0 - (average - 20.0) / 20.0 * 0.8).clamp(0.2, 1.0)
    };
    let score_entry = CriterionScore::new(kind, score);
    if average > 25.0 {
        score_entry.with_note(format!(
            "Sentences average {:.0} words; split them to stay under 20.",
            average
        ))
    } else {
        score_entry
    }
}
