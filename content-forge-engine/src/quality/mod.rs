//! Quality evaluators
//!
//! [`HeuristicEvaluator`] measures text without model calls;
//! [`ModelJudgeEvaluator`] routes a judge prompt and combines its verdicts
//! with the heuristic measurements.

pub mod heuristic;
pub mod judge;

pub use heuristic::HeuristicEvaluator;
pub use judge::ModelJudgeEvaluator;
