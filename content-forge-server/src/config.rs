//! Layered application configuration
//!
//! Sources, later ones winning: built-in defaults, `config/default`,
//! `config/local`, an explicit `--config` file, then `CONTENT_FORGE__*`
//! environment variables (`CONTENT_FORGE__DATABASE__URL` sets
//! `database.url`).

use crate::{Error, Result};
use content_forge_core::config::ForgeConfig;
use content_forge_engine::{LibraryAsset, OpenAiBackendConfig};
use content_forge_storage::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "CONTENT_FORGE";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub forge: ForgeConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub backends: Vec<OpenAiBackendConfig>,
    pub publisher: PublisherConfig,
    pub assets: Vec<LibraryAsset>,
    /// Directory of `<prompt>.md` template overrides
    pub prompts_dir: Option<PathBuf>,
    pub evaluator: EvaluatorKind,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Directory for daily-rotated JSON log files
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Where approved articles are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub output_dir: PathBuf,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(".content-forge/published"),
        }
    }
}

/// How drafts are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    /// A model judges the criteria text measurements cannot
    #[default]
    Judge,
    /// Text measurements only, no model calls
    Heuristic,
}

impl AppConfig {
    /// Load configuration from the default locations and the environment
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(Error::Configuration(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the deserializer cannot express
    pub fn validate(&self) -> Result<()> {
        self.forge.validate()?;
        if self.database.url.trim().is_empty() {
            return Err(Error::Configuration("Database URL is required".to_string()));
        }

        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(Error::Configuration("Backend id cannot be empty".to_string()));
            }
            if !ids.insert(backend.id.as_str()) {
                return Err(Error::Configuration(format!(
                    "Backend '{}' is configured twice",
                    backend.id
                )));
            }
            if !backend.cost_per_call.is_finite() || backend.cost_per_call < 0.0 {
                return Err(Error::Configuration(format!(
                    "Backend '{}' has an invalid cost per call",
                    backend.id
                )));
            }
        }

        let mut asset_ids = HashSet::new();
        for asset in &self.assets {
            if !asset_ids.insert(asset.id.as_str()) {
                return Err(Error::Configuration(format!(
                    "Asset '{}' is listed twice",
                    asset.id
                )));
            }
        }
        Ok(())
    }
}
