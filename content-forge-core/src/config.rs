//! Pipeline configuration model
//!
//! Typed settings shared by the orchestrator, the quality gate and the model
//! router. Every section has defaults so a partial file deserialises.
//!
//! # Examples
//!
//! ```rust
//! use content_forge_core::config::*;
//!
//! let config = ForgeConfig::default();
//! assert_eq!(config.pipeline.max_refinements, 3);
//! assert_eq!(config.router.max_attempts, 3);
//! config.validate().unwrap();
//! ```

use crate::backend::Capability;
use crate::quality::{Criterion, CriterionKind, Rubric};
use crate::task::{Stage, DEFAULT_QUALITY_THRESHOLD};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ForgeConfig {
    pub pipeline: PipelineSettings,
    pub quality: QualitySettings,
    pub router: RouterSettings,
}

impl ForgeConfig {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.quality.rubric()?;
        self.router.validate()?;
        Ok(())
    }
}

/// Bounds and timeouts of the content pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_refinements: u32,
    pub default_quality_threshold: f64,
    pub min_topic_chars: usize,
    pub max_topic_chars: usize,
    pub min_target_words: u32,
    pub max_target_words: u32,
    pub stage_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    /// Bound on the asset collaborator; a timeout means no asset
    pub asset_timeout_secs: u64,
    /// Re-read-and-retry rounds after an optimistic version conflict
    pub conflict_retries: u32,
    pub default_budget_ceiling: Option<f64>,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_refinements: 3,
            default_quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            min_topic_chars: 3,
            max_topic_chars: 200,
            min_target_words: 100,
            max_target_words: 10_000,
            stage_timeout_secs: 300,
            publish_timeout_secs: 60,
            asset_timeout_secs: 30,
            conflict_retries: 3,
            default_budget_ceiling: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn asset_timeout(&self) -> Duration {
        Duration::from_secs(self.asset_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.min_topic_chars == 0 || self.min_topic_chars > self.max_topic_chars {
            return Err(Error::configuration(format!(
                "Invalid topic bounds {}..={}",
                self.min_topic_chars, self.max_topic_chars
            )));
        }
        if self.min_target_words == 0 || self.min_target_words > self.max_target_words {
            return Err(Error::configuration(format!(
                "Invalid target length bounds {}..={}",
                self.min_target_words, self.max_target_words
            )));
        }
        if !(0.0..=1.0).contains(&self.default_quality_threshold) {
            return Err(Error::configuration(
                "Default quality threshold must be within [0, 1]",
            ));
        }
        if self.stage_timeout_secs == 0
            || self.publish_timeout_secs == 0
            || self.asset_timeout_secs == 0
        {
            return Err(Error::configuration("Timeouts must be positive"));
        }
        if let Some(ceiling) = self.default_budget_ceiling {
            if ceiling <= 0.0 || !ceiling.is_finite() {
                return Err(Error::configuration("Default budget ceiling must be positive"));
            }
        }
        self.retry.validate()
    }
}

/// Bounded retry policy for transient stage failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 250,
            backoff_multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, handy for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            backoff_multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the given retry (1 for the first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::configuration("Retry max_attempts must be at least 1"));
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(Error::configuration("Retry backoff multiplier must be >= 1"));
        }
        Ok(())
    }
}

/// Weight of one rubric criterion as configured
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CriterionWeight {
    pub criterion: CriterionKind,
    pub weight: f64,
}

/// Rubric configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualitySettings {
    pub criteria: Vec<CriterionWeight>,
    pub hard_floor: f64,
}

impl Default for QualitySettings {
    fn default() -> Self {
        let rubric = Rubric::default();
        Self {
            criteria: rubric
                .criteria()
                .iter()
                .map(|c| CriterionWeight {
                    criterion: c.kind,
                    weight: c.weight,
                })
                .collect(),
            hard_floor: rubric.hard_floor(),
        }
    }
}

impl QualitySettings {
    /// Build the validated rubric
    pub fn rubric(&self) -> Result<Rubric> {
        Rubric::new(
            self.criteria
                .iter()
                .map(|c| Criterion {
                    kind: c.criterion,
                    weight: c.weight,
                })
                .collect(),
            self.hard_floor,
        )
    }
}

/// Model router configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouterSettings {
    /// Total generate attempts across fallback tiers
    pub max_attempts: u32,
    pub call_timeout_secs: u64,
    pub probe_interval_secs: u64,
    /// Descriptors whose last probe is older than this are skipped
    pub staleness_secs: u64,
    /// Capabilities a backend must advertise to serve a stage, keyed by stage name
    pub stage_requirements: HashMap<String, Vec<Capability>>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        let mut stage_requirements = HashMap::new();
        stage_requirements.insert(
            Stage::QualityReview.as_str().to_string(),
            vec![Capability::StructuredOutput],
        );
        Self {
            max_attempts: 3,
            call_timeout_secs: 60,
            probe_interval_secs: 30,
            staleness_secs: 300,
            stage_requirements,
        }
    }
}

impl RouterSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_secs as i64)
    }

    /// Capabilities required for a stage
    pub fn requirements(&self, stage: Stage) -> &[Capability] {
        self.stage_requirements
            .get(stage.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::configuration("Router max_attempts must be at least 1"));
        }
        if self.call_timeout_secs == 0 || self.probe_interval_secs == 0 {
            return Err(Error::configuration(
                "Router timeout and probe interval must be positive",
            ));
        }
        for stage in self.stage_requirements.keys() {
            stage.parse::<Stage>()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ForgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.retry.max_attempts, 2);
        assert_eq!(config.quality.hard_floor, 0.3);
        assert_eq!(config.quality.rubric().unwrap(), Rubric::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ForgeConfig =
            serde_json::from_str(r#"{"pipeline": {"max_refinements": 5}}"#).unwrap();
        assert_eq!(config.pipeline.max_refinements, 5);
        assert_eq!(config.pipeline.max_topic_chars, 200);
        assert_eq!(config.router.max_attempts, 3);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = ForgeConfig::default();
        config.pipeline.min_topic_chars = 300;
        assert!(config.validate().is_err());

        let mut config = ForgeConfig::default();
        config.router.stage_requirements.insert("polish".into(), vec![]);
        assert!(config.validate().is_err());

        let mut config = ForgeConfig::default();
        config.quality.criteria.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 300,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(RetryPolicy::immediate(2).delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_stage_requirements_lookup() {
        let settings = RouterSettings::default();
        assert_eq!(
            settings.requirements(Stage::QualityReview),
            &[Capability::StructuredOutput]
        );
        assert!(settings.requirements(Stage::Draft).is_empty());
    }
}
