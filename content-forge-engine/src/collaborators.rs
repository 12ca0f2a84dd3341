//! Local publisher and asset sources
//!
//! Production deployments plug their CMS and media search in behind the
//! [`Publisher`] and [`AssetSelector`] traits. These implementations cover
//! local runs: articles land as markdown files and assets come from a
//! configured library.

use crate::error::Error;
use async_trait::async_trait;
use chrono::Utc;
use content_forge_core::collaborators::{
    AssetReference, AssetSelector, FormattedContent, PublishMetadata, PublishReceipt, Publisher,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Writes each published article to `<slug>-<id>.md` in a directory
pub struct FilesystemPublisher {
    output_dir: PathBuf,
}

impl FilesystemPublisher {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn write(
        &self,
        content: &FormattedContent,
        metadata: &PublishMetadata,
    ) -> crate::Result<PublishReceipt> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Error::io(&self.output_dir, e))?;

        let external_id = Uuid::new_v4();
        let simple = external_id.simple().to_string();
        let path = self
            .output_dir
            .join(format!("{}-{}.md", content.slug, &simple[..8]));
        let document = render_document(content, metadata)?;
        fs::write(&path, document)
            .await
            .map_err(|e| Error::io(&path, e))?;

        let canonical = fs::canonicalize(&path)
            .await
            .map_err(|e| Error::io(&path, e))?;
        info!(task_id = %metadata.task_id, path = %canonical.display(), "Wrote article");
        Ok(PublishReceipt {
            external_id: external_id.to_string(),
            url: format!("file://{}", canonical.display()),
            published_at: Utc::now(),
        })
    }
}

/// Markdown with a front matter block whose values are JSON-encoded
fn render_document(
    content: &FormattedContent,
    metadata: &PublishMetadata,
) -> crate::Result<String> {
    let mut out = String::from("---\n");
    out.push_str(&format!("title: {}\n", serde_json::to_string(&content.title)?));
    out.push_str(&format!("slug: {}\n", serde_json::to_string(&content.slug)?));
    out.push_str(&format!("summary: {}\n", serde_json::to_string(&content.summary)?));
    out.push_str(&format!("task_id: \"{}\"\n", metadata.task_id));
    out.push_str(&format!("keywords: {}\n", serde_json::to_string(&metadata.keywords)?));
    if let Some(score) = metadata.quality_score {
        out.push_str(&format!("quality_score: {:.3}\n", score));
    }
    if let Some(reviewer) = &metadata.reviewer_id {
        out.push_str(&format!("reviewer: {}\n", serde_json::to_string(reviewer)?));
    }
    if let Some(asset) = &metadata.asset {
        out.push_str(&format!("image: {}\n", serde_json::to_string(&asset.url)?));
    }
    out.push_str("---\n\n");
    out.push_str(content.body_markdown.trim());
    out.push('\n');
    Ok(out)
}

#[async_trait]
impl Publisher for FilesystemPublisher {
    async fn publish(
        &self,
        content: &FormattedContent,
        metadata: &PublishMetadata,
    ) -> content_forge_core::Result<PublishReceipt> {
        Ok(self.write(content, metadata).await?)
    }
}

/// One entry of a configured asset library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryAsset {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<&LibraryAsset> for AssetReference {
    fn from(asset: &LibraryAsset) -> Self {
        Self {
            id: asset.id.clone(),
            url: asset.url.clone(),
            alt_text: asset.alt_text.clone(),
            attribution: asset.attribution.clone(),
        }
    }
}

/// Picks the library asset whose tags overlap most with the request
pub struct StaticAssetLibrary {
    assets: Vec<LibraryAsset>,
}

impl StaticAssetLibrary {
    pub fn new(assets: Vec<LibraryAsset>) -> Self {
        Self { assets }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Best match by tag overlap; ties go to the earlier entry
    pub fn best_match(&self, topic: &str, keywords: &[String]) -> Option<&LibraryAsset> {
        let mut terms: HashSet<String> = topic
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(str::to_lowercase)
            .collect();
        terms.extend(keywords.iter().map(|k| k.trim().to_lowercase()));

        let mut best: Option<(&LibraryAsset, usize)> = None;
        for asset in &self.assets {
            let overlap = asset
                .tags
                .iter()
                .filter(|tag| terms.contains(&tag.trim().to_lowercase()))
                .count();
            if overlap > 0 && best.map_or(true, |(_, score)| overlap > score) {
                best = Some((asset, overlap));
            }
        }
        best.map(|(asset, _)| asset)
    }
}

#[async_trait]
impl AssetSelector for StaticAssetLibrary {
    async fn select_asset(
        &self,
        topic: &str,
        keywords: &[String],
    ) -> content_forge_core::Result<Option<AssetReference>> {
        let found = self.best_match(topic, keywords).map(AssetReference::from);
        debug!(topic, asset_id = ?found.as_ref().map(|a| &a.id), "Asset lookup");
        Ok(found)
    }
}

/// Asset source for deployments without imagery
pub struct NoAssets;

#[async_trait]
impl AssetSelector for NoAssets {
    async fn select_asset(
        &self,
        _topic: &str,
        _keywords: &[String],
    ) -> content_forge_core::Result<Option<AssetReference>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn content() -> FormattedContent {
        FormattedContent {
            title: "Heat \"pumps\" explained".into(),
            slug: "heat-pumps-explained".into(),
            summary: "Why they work.".into(),
            body_markdown: "# Heat pumps\n\nThey move heat.".into(),
            word_count: 5,
        }
    }

    fn metadata() -> PublishMetadata {
        PublishMetadata {
            task_id: Uuid::new_v4(),
            topic: "heat pumps".into(),
            keywords: vec!["efficiency".into()],
            asset: None,
            quality_score: Some(0.86),
            reviewer_id: Some("editor-1".into()),
        }
    }

    #[tokio::test]
    async fn test_filesystem_publisher_writes_markdown() {
        let dir = TempDir::new().unwrap();
        let publisher = FilesystemPublisher::new(dir.path().join("out"));

        let receipt = publisher.publish(&content(), &metadata()).await.unwrap();
        assert!(receipt.url.starts_with("file://"));

        let path = receipt.url.trim_start_matches("file://");
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.starts_with("---\ntitle: \"Heat \\\"pumps\\\" explained\"\n"));
        assert!(written.contains("quality_score: 0.860"));
        assert!(written.ends_with("They move heat.\n"));
        assert!(path.contains("heat-pumps-explained-"));
    }

    #[test]
    fn test_library_picks_largest_overlap() {
        let library = StaticAssetLibrary::new(vec![
            LibraryAsset {
                id: "solar".into(),
                url: "https://img.example/solar.jpg".into(),
                alt_text: None,
                attribution: None,
                tags: vec!["solar".into(), "energy".into()],
            },
            LibraryAsset {
                id: "pump".into(),
                url: "https://img.example/pump.jpg".into(),
                alt_text: Some("A heat pump".into()),
                attribution: None,
                tags: vec!["heat".into(), "pumps".into(), "energy".into()],
            },
        ]);

        let found = library
            .best_match("Heat pumps and energy", &[])
            .map(|a| a.id.as_str());
        assert_eq!(found, Some("pump"));
        assert_eq!(
            library
                .best_match("cheap energy", &[])
                .map(|a| a.id.as_str()),
            Some("solar")
        );
        assert!(library.best_match("gardening", &[]).is_none());
    }
}
