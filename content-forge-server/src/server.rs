//! Application assembly from configuration

use crate::config::{AppConfig, EvaluatorKind};
use crate::Result;
use content_forge_core::store::{Pagination, TaskFilter};
use content_forge_engine::{
    Engine, FilesystemPublisher, HeuristicEvaluator, OpenAiCompatibleBackend, StaticAssetLibrary,
};
use content_forge_prompts::PromptLibrary;
use content_forge_storage::StorageManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SETTLE_POLL: Duration = Duration::from_millis(200);

/// Storage plus the engine built on it
pub struct Application {
    config: AppConfig,
    storage: StorageManager,
    engine: Engine,
    refresh: Option<JoinHandle<()>>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let storage = StorageManager::new(&config.database).await?;
        storage.health_check().await?;

        let mut prompts = PromptLibrary::with_defaults()?;
        if let Some(dir) = &config.prompts_dir {
            prompts.load_overrides(dir)?;
        }

        let mut builder = Engine::builder(config.forge.clone(), storage.tasks(), storage.training())
            .prompts(prompts)
            .publisher(Arc::new(FilesystemPublisher::new(
                config.publisher.output_dir.clone(),
            )));
        for backend in &config.backends {
            builder = builder.backend(Arc::new(OpenAiCompatibleBackend::new(backend.clone())?));
        }
        if config.backends.is_empty() {
            warn!("No generation backends configured; every stage will fail");
        }
        if config.evaluator == EvaluatorKind::Heuristic {
            builder = builder.evaluator(Arc::new(HeuristicEvaluator::new()));
        }
        if !config.assets.is_empty() {
            builder = builder.assets(Arc::new(StaticAssetLibrary::new(config.assets.clone())));
        }
        let engine = builder.build()?;

        info!(
            backends = config.backends.len(),
            evaluator = ?config.evaluator,
            assets = config.assets.len(),
            "Application initialized"
        );
        Ok(Self {
            config,
            storage,
            engine,
            refresh: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Keep backend availability current while this process drives tasks
    pub fn start_availability_refresh(&mut self) {
        if self.refresh.is_none() {
            self.refresh = Some(self.engine.spawn_background());
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Resume interrupted tasks and wait until none has a driver left
    pub async fn resume_and_settle(&self) -> Result<usize> {
        let orchestrator = self.engine.orchestrator();
        let resumed = orchestrator.resume_incomplete().await?;
        if resumed == 0 {
            return Ok(0);
        }
        let filter = TaskFilter::incomplete();
        loop {
            tokio::time::sleep(SETTLE_POLL).await;
            let remaining = orchestrator
                .list(&filter, Pagination::new(0, 1_000))
                .await?;
            if remaining.iter().all(|task| !orchestrator.is_active(task.id)) {
                break;
            }
        }
        Ok(resumed)
    }

    pub async fn shutdown(self) {
        if let Some(refresh) = self.refresh {
            refresh.abort();
            debug!("Stopped availability refresh");
        }
        self.storage.close().await;
        info!("Application shut down");
    }
}
