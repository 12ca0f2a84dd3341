//! Shared fixtures for the engine integration tests
//!
//! Every context runs against a file-backed SQLite database in a temporary
//! file, with scripted backends, a scripted evaluator and zero retry delays.

#![allow(dead_code)]

use content_forge_core::backend::ModelBackend;
use content_forge_core::collaborators::{AssetSelector, Publisher};
use content_forge_core::config::{ForgeConfig, RetryPolicy};
use content_forge_core::history::StageHistoryEntry;
use content_forge_core::task::{ContentTask, Stage, TaskInput, TaskStatus};
use content_forge_engine::testing::{RecordingPublisher, ScriptedBackend, ScriptedEvaluator};
use content_forge_engine::Engine;
use content_forge_storage::{DatabaseConfig, StorageManager};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Engine plus handles on every scripted collaborator
pub struct TestContext {
    pub engine: Engine,
    pub storage: StorageManager,
    pub backends: Vec<Arc<ScriptedBackend>>,
    pub evaluator: Arc<ScriptedEvaluator>,
    _temp_db: NamedTempFile,
}

pub struct TestContextBuilder {
    config: ForgeConfig,
    backends: Vec<ScriptedBackend>,
    evaluator: ScriptedEvaluator,
    publisher: Arc<dyn Publisher>,
    assets: Option<Arc<dyn AssetSelector>>,
}

impl TestContext {
    pub fn builder() -> TestContextBuilder {
        let mut config = ForgeConfig::default();
        config.pipeline.retry = RetryPolicy::immediate(2);
        config.router.call_timeout_secs = 1;
        TestContextBuilder {
            config,
            backends: Vec::new(),
            evaluator: ScriptedEvaluator::always(0.9),
            publisher: Arc::new(RecordingPublisher::new()),
            assets: None,
        }
    }

    /// One cheap backend, an evaluator that always passes
    pub async fn new() -> Self {
        Self::builder()
            .backend(ScriptedBackend::new("primary", 0.1))
            .build()
            .await
    }

    pub fn backend(&self, id: &str) -> &Arc<ScriptedBackend> {
        self.backends
            .iter()
            .find(|b| b.descriptor().id == id)
            .expect("Unknown scripted backend")
    }

    pub async fn history(&self, id: Uuid) -> Vec<StageHistoryEntry> {
        self.engine
            .orchestrator()
            .history(id)
            .await
            .expect("Failed to read history")
    }

    /// Poll until the task leaves the driver's statuses
    pub async fn wait_until_settled(&self, id: Uuid) -> ContentTask {
        for _ in 0..200 {
            let task = self.engine.orchestrator().get(id).await.expect("Task vanished");
            if !task.status.is_machine_driven() && !self.engine.orchestrator().is_active(id) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("Task {} did not settle", id);
    }
}

impl TestContextBuilder {
    pub fn backend(mut self, backend: ScriptedBackend) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn evaluator(mut self, evaluator: ScriptedEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn assets(mut self, assets: Arc<dyn AssetSelector>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn configure<F: FnOnce(&mut ForgeConfig)>(mut self, apply: F) -> Self {
        apply(&mut self.config);
        self
    }

    pub async fn build(self) -> TestContext {
        let temp_db = NamedTempFile::new().expect("Failed to create temp file");
        let url = format!("sqlite://{}", temp_db.path().display());
        let storage = StorageManager::new(&DatabaseConfig::new(url))
            .await
            .expect("Failed to open test database");

        let backends: Vec<Arc<ScriptedBackend>> =
            self.backends.into_iter().map(Arc::new).collect();
        let evaluator = Arc::new(self.evaluator);

        let mut builder = Engine::builder(self.config, storage.tasks(), storage.training())
            .evaluator(evaluator.clone())
            .publisher(self.publisher);
        for backend in &backends {
            builder = builder.backend(backend.clone());
        }
        if let Some(assets) = self.assets {
            builder = builder.assets(assets);
        }
        let engine = builder.build().expect("Failed to build engine");

        TestContext {
            engine,
            storage,
            backends,
            evaluator,
            _temp_db: temp_db,
        }
    }
}

pub fn input(topic: &str) -> TaskInput {
    TaskInput::builder()
        .topic(topic)
        .target_length(600)
        .keyword("efficiency")
        .build()
        .expect("Invalid test input")
}

pub fn stages_of(history: &[StageHistoryEntry]) -> Vec<Stage> {
    history.iter().map(|entry| entry.stage).collect()
}

pub fn assert_status(task: &ContentTask, status: TaskStatus) {
    assert_eq!(
        task.status, status,
        "task {} ended in {} (failure: {:?})",
        task.id, task.status, task.failure
    );
}
