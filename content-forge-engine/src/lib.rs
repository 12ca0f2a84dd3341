//! Content Forge engine
//!
//! Wires the pipeline together: the [`ModelRouter`] picks and calls
//! generation backends, [`StageExecutors`] do the per-stage work, the
//! [`ContentOrchestrator`] drives tasks up to the [`ApprovalGate`], and
//! [`TrainingDataCapture`] records every finished task.
//!
//! # Examples
//!
//! ```rust,no_run
//! use content_forge_core::config::ForgeConfig;
//! use content_forge_core::task::TaskInput;
//! use content_forge_engine::{Engine, FilesystemPublisher, OpenAiBackendConfig, OpenAiCompatibleBackend};
//! use content_forge_storage::{DatabaseConfig, StorageManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = StorageManager::new(&DatabaseConfig::new("sqlite:./forge.db")).await?;
//! let backend = OpenAiCompatibleBackend::new(OpenAiBackendConfig {
//!     id: "local".into(),
//!     base_url: "http://localhost:8000/v1".into(),
//!     model: "writer".into(),
//!     api_key_env: None,
//!     cost_per_call: 0.01,
//!     capabilities: vec![],
//! })?;
//!
//! let engine = Engine::builder(ForgeConfig::default(), storage.tasks(), storage.training())
//!     .backend(Arc::new(backend))
//!     .publisher(Arc::new(FilesystemPublisher::new("./published")))
//!     .build()?;
//!
//! let input = TaskInput::builder().topic("heat pumps").target_length(800).build()?;
//! let task = engine.orchestrator().create_and_wait(input).await?;
//! println!("{} is {}", task.id, task.status);
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod capture;
pub mod collaborators;
pub mod error;
pub mod orchestrator;
pub mod quality;
pub mod routing;
pub mod stages;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use approval::{ApprovalGate, Decision};
pub use capture::TrainingDataCapture;
pub use collaborators::{FilesystemPublisher, LibraryAsset, NoAssets, StaticAssetLibrary};
pub use error::{Error, Result};
pub use orchestrator::ContentOrchestrator;
pub use quality::{HeuristicEvaluator, ModelJudgeEvaluator};
pub use routing::{
    BackendRegistry, Generation, ModelRouter, OpenAiBackendConfig, OpenAiCompatibleBackend,
};
pub use stages::{StageExecutors, StageResult};

use content_forge_core::backend::ModelBackend;
use content_forge_core::collaborators::{AssetSelector, Publisher};
use content_forge_core::config::ForgeConfig;
use content_forge_core::quality::QualityEvaluator;
use content_forge_core::store::{TaskStore, TrainingStore};
use content_forge_prompts::PromptLibrary;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// The assembled pipeline
#[derive(Clone)]
pub struct Engine {
    orchestrator: ContentOrchestrator,
    approvals: Arc<ApprovalGate>,
    capture: Arc<TrainingDataCapture>,
    router: Arc<ModelRouter>,
}

impl Engine {
    pub fn builder(
        config: ForgeConfig,
        tasks: Arc<dyn TaskStore>,
        training: Arc<dyn TrainingStore>,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            tasks,
            training,
            backends: Vec::new(),
            evaluator: None,
            assets: None,
            publisher: None,
            prompts: None,
        }
    }

    pub fn orchestrator(&self) -> &ContentOrchestrator {
        &self.orchestrator
    }

    pub fn approvals(&self) -> &ApprovalGate {
        &self.approvals
    }

    pub fn capture(&self) -> &TrainingDataCapture {
        &self.capture
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    /// Start the periodic availability refresh
    pub fn spawn_background(&self) -> JoinHandle<()> {
        self.router.spawn_availability_refresh()
    }
}

/// Collects the pieces of an [`Engine`]
pub struct EngineBuilder {
    config: ForgeConfig,
    tasks: Arc<dyn TaskStore>,
    training: Arc<dyn TrainingStore>,
    backends: Vec<Arc<dyn ModelBackend>>,
    evaluator: Option<Arc<dyn QualityEvaluator>>,
    assets: Option<Arc<dyn AssetSelector>>,
    publisher: Option<Arc<dyn Publisher>>,
    prompts: Option<PromptLibrary>,
}

impl EngineBuilder {
    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Replace the default model-judged evaluator
    pub fn evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn assets(mut self, assets: Arc<dyn AssetSelector>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Validate the configuration and assemble the engine
    pub fn build(self) -> content_forge_core::Result<Engine> {
        self.config.validate()?;
        let rubric = self.config.quality.rubric()?;
        let publisher = self.publisher.ok_or_else(|| {
            content_forge_core::Error::configuration("A publisher is required")
        })?;

        let registry = Arc::new(BackendRegistry::new());
        for backend in self.backends {
            registry.register(backend)?;
        }
        let router = Arc::new(ModelRouter::new(registry, self.config.router.clone()));
        let prompts = Arc::new(match self.prompts {
            Some(prompts) => prompts,
            None => PromptLibrary::with_defaults()?,
        });
        let evaluator: Arc<dyn QualityEvaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(ModelJudgeEvaluator::new(router.clone(), prompts.clone())),
        };
        let assets: Arc<dyn AssetSelector> = match self.assets {
            Some(assets) => assets,
            None => Arc::new(NoAssets),
        };
        let settings = Arc::new(self.config.pipeline.clone());

        let capture = Arc::new(TrainingDataCapture::new(
            self.tasks.clone(),
            self.training.clone(),
        ));
        let stages = Arc::new(StageExecutors::new(
            router.clone(),
            prompts,
            evaluator,
            assets,
            rubric,
            settings.clone(),
        ));
        let orchestrator = ContentOrchestrator::new(
            self.tasks.clone(),
            stages,
            capture.clone(),
            settings.clone(),
        );
        let approvals = Arc::new(ApprovalGate::new(
            self.tasks,
            publisher,
            capture.clone(),
            settings,
        ));

        info!(backends = router.registry().len(), "Engine assembled");
        Ok(Engine {
            orchestrator,
            approvals,
            capture,
            router,
        })
    }
}
