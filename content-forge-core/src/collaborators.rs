//! Narrow contracts with out-of-scope collaborators
//!
//! Publication and asset selection live outside the pipeline. The orchestrator
//! and approval gate only see these traits.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to an image or other media chosen for the article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReference {
    pub id: String,
    pub url: String,
    pub alt_text: Option<String>,
    pub attribution: Option<String>,
}

/// Publishable output of the format stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedContent {
    pub title: String,
    pub slug: String,
    pub summary: String,
    pub body_markdown: String,
    pub word_count: usize,
}

/// Metadata handed to the publisher alongside the content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMetadata {
    pub task_id: Uuid,
    pub topic: String,
    pub keywords: Vec<String>,
    pub asset: Option<AssetReference>,
    pub quality_score: Option<f64>,
    pub reviewer_id: Option<String>,
}

/// External reference returned by a successful publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub external_id: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

/// Publishes approved content to the destination system
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        content: &FormattedContent,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt>;
}

/// Finds an asset for a topic; failures are never fatal to the pipeline
#[async_trait]
pub trait AssetSelector: Send + Sync {
    async fn select_asset(&self, topic: &str, keywords: &[String])
        -> Result<Option<AssetReference>>;
}
