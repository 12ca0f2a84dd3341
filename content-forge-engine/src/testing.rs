//! Deterministic collaborators for tests and offline runs
//!
//! Scripted backends and evaluators replay fixed outcomes; the publishers
//! record or refuse what they are given. All of them count their calls so
//! tests can assert that nothing ran twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use content_forge_core::backend::{BackendDescriptor, Capability, GenerationParams, ModelBackend};
use content_forge_core::budget::CostLedger;
use content_forge_core::collaborators::{
    AssetReference, AssetSelector, FormattedContent, PublishMetadata, PublishReceipt, Publisher,
};
use content_forge_core::quality::{
    CriterionScore, Evaluation, EvaluationContext, QualityEvaluator, Rubric,
};
use content_forge_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Article returned by scripted backends that have no script
pub const DEFAULT_ARTICLE: &str = "# Scripted article\n\n\
An introduction that sets up the topic in a few short sentences.\n\n\
## Details\n\n\
A body paragraph with the facts the reader needs.\n\n\
## Conclusion\n\n\
A closing paragraph that sums up the argument.\n";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One scripted backend outcome
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Text(String),
    /// Fail with a transient backend error
    Fail(String),
    /// Never answer; the router's call timeout cuts it off
    Hang,
}

/// Backend replaying queued replies, then a default reply
pub struct ScriptedBackend {
    descriptor: Mutex<BackendDescriptor>,
    script: Mutex<VecDeque<ScriptedReply>>,
    default_reply: ScriptedReply,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
    probe_ok: AtomicBool,
}

impl ScriptedBackend {
    pub fn new<S: Into<String>>(id: S, cost_per_call: f64) -> Self {
        Self {
            descriptor: Mutex::new(BackendDescriptor::new(id, cost_per_call)),
            script: Mutex::new(VecDeque::new()),
            default_reply: ScriptedReply::Text(DEFAULT_ARTICLE.to_string()),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
            probe_ok: AtomicBool::new(true),
        }
    }

    pub fn with_capability(self, capability: Capability) -> Self {
        {
            let mut descriptor = lock(&self.descriptor);
            *descriptor = descriptor.clone().with_capability(capability);
        }
        self
    }

    pub fn replying<S: Into<String>>(mut self, text: S) -> Self {
        self.default_reply = ScriptedReply::Text(text.into());
        self
    }

    pub fn failing<S: Into<String>>(mut self, message: S) -> Self {
        self.default_reply = ScriptedReply::Fail(message.into());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.default_reply = ScriptedReply::Hang;
        self
    }

    /// Queue a reply ahead of the default
    pub fn then(self, reply: ScriptedReply) -> Self {
        self.push_reply(reply);
        self
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        lock(&self.script).push_back(reply);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    /// Backdate the self-reported availability check
    pub fn set_checked_at(&self, checked_at: DateTime<Utc>) {
        lock(&self.descriptor).availability.checked_at = checked_at;
    }

    fn id(&self) -> String {
        lock(&self.descriptor).id.clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn descriptor(&self) -> BackendDescriptor {
        lock(&self.descriptor).clone()
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(prompt.to_string());
        let reply = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(message) => Err(Error::backend(self.id(), message)),
            ScriptedReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(Error::backend(self.id(), "scripted hang elapsed"))
            }
        }
    }

    async fn probe(&self) -> Result<()> {
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::backend(self.id(), "probe refused"))
        }
    }
}

/// Evaluator returning queued aggregate scores, repeating the last one
///
/// Every rubric criterion receives the same score, so the aggregate equals
/// the scripted value and the pass decision follows the task's threshold.
pub struct ScriptedEvaluator {
    scores: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    pending_failures: AtomicU32,
    calls: AtomicU32,
}

impl ScriptedEvaluator {
    pub fn new<I: IntoIterator<Item = f64>>(scores: I) -> Self {
        let scores: VecDeque<f64> = scores.into_iter().collect();
        let last = scores.back().copied().unwrap_or(1.0);
        Self {
            scores: Mutex::new(scores),
            last: Mutex::new(last),
            pending_failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(score: f64) -> Self {
        Self::new([score])
    }

    /// Fail the next `count` evaluations with a transient error
    pub fn failing_first(self, count: u32) -> Self {
        self.pending_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QualityEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        _text: &str,
        rubric: &Rubric,
        context: &EvaluationContext,
        _ledger: &mut CostLedger,
    ) -> Result<Evaluation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.pending_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::backend("evaluator", "judge unavailable"));
        }

        let score = match lock(&self.scores).pop_front() {
            Some(score) => {
                *lock(&self.last) = score;
                score
            }
            None => *lock(&self.last),
        };
        let scores: Vec<CriterionScore> = rubric
            .criteria()
            .iter()
            .map(|c| CriterionScore::new(c.kind, score))
            .collect();
        rubric.aggregate(&scores, context.threshold)
    }
}

/// What a [`RecordingPublisher`] was asked to publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedItem {
    pub content: FormattedContent,
    pub metadata: PublishMetadata,
}

/// Publisher that accepts everything and remembers it
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedItem>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        lock(&self.published).len()
    }

    pub fn published(&self) -> Vec<PublishedItem> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        content: &FormattedContent,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt> {
        let mut published = lock(&self.published);
        published.push(PublishedItem {
            content: content.clone(),
            metadata: metadata.clone(),
        });
        Ok(PublishReceipt {
            external_id: format!("post-{}", published.len()),
            url: format!("https://cms.example/posts/{}", content.slug),
            published_at: Utc::now(),
        })
    }
}

/// Publisher whose destination is always down
pub struct FailingPublisher {
    message: String,
    calls: AtomicU32,
}

impl FailingPublisher {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(
        &self,
        _content: &FormattedContent,
        _metadata: &PublishMetadata,
    ) -> Result<PublishReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::backend("publisher", self.message.clone()))
    }
}

/// Asset source that always errors
pub struct FailingAssets;

#[async_trait]
impl AssetSelector for FailingAssets {
    async fn select_asset(
        &self,
        _topic: &str,
        _keywords: &[String],
    ) -> Result<Option<AssetReference>> {
        Err(Error::backend("assets", "image search unavailable"))
    }
}
