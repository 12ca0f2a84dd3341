//! Generation backend seam and routing metadata
//!
//! Every provider adapter implements [`ModelBackend`]; the router only ever
//! sees descriptors and the uniform `generate` call.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability tag advertised by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Handles prompts and outputs of several thousand words
    LongContext,
    /// Reliably returns machine-readable JSON
    StructuredOutput,
    /// Can be asked for research notes with sources
    WebResearch,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::LongContext => "long_context",
            Capability::StructuredOutput => "structured_output",
            Capability::WebResearch => "web_research",
        })
    }
}

/// Result of the last availability probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub checked_at: DateTime<Utc>,
}

impl Availability {
    pub fn up() -> Self {
        Self {
            available: true,
            checked_at: Utc::now(),
        }
    }

    pub fn down() -> Self {
        Self {
            available: false,
            checked_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.checked_at) > max_age
    }
}

/// Routing metadata of one generation backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: String,
    /// Estimated cost of one call in the accounting currency
    pub cost_per_call: f64,
    pub capabilities: Vec<Capability>,
    pub availability: Availability,
}

impl BackendDescriptor {
    pub fn new<S: Into<String>>(id: S, cost_per_call: f64) -> Self {
        Self {
            id: id.into(),
            cost_per_call,
            capabilities: Vec::new(),
            availability: Availability::up(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn supports_all(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }

    /// Fresh and available descriptors are eligible for routing
    pub fn is_routable(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.availability.available && !self.availability.is_stale(max_age, now)
    }
}

/// Sampling parameters passed through to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            system: None,
        }
    }
}

/// Uniform capability implemented by every provider adapter
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Static routing metadata; availability is managed by the router
    fn descriptor(&self) -> BackendDescriptor;

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Cheap liveness check used by the background availability refresh
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_matching() {
        let descriptor = BackendDescriptor::new("judge", 0.01)
            .with_capability(Capability::StructuredOutput)
            .with_capability(Capability::StructuredOutput);
        assert_eq!(descriptor.capabilities.len(), 1);
        assert!(descriptor.supports_all(&[]));
        assert!(descriptor.supports_all(&[Capability::StructuredOutput]));
        assert!(!descriptor.supports_all(&[Capability::LongContext]));
    }

    #[test]
    fn test_stale_descriptors_are_not_routable() {
        let now = Utc::now();
        let mut descriptor = BackendDescriptor::new("primary", 0.1);
        assert!(descriptor.is_routable(Duration::minutes(5), now));

        descriptor.availability.checked_at = now - Duration::minutes(10);
        assert!(!descriptor.is_routable(Duration::minutes(5), now));

        descriptor.availability = Availability::down();
        assert!(!descriptor.is_routable(Duration::minutes(5), now));
    }
}
