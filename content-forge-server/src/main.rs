//! Content Forge command-line interface
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use content_forge_core::store::{Pagination, TaskFilter};
use content_forge_core::task::{ContentStyle, Stage, TaskInput, TaskStatus};
use content_forge_core::training::{ExampleFilter, TagMode};
use content_forge_engine::Decision;
use content_forge_server::config::AppConfig;
use content_forge_server::{logging, Application};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;

/// Quality-gated, human-approved article generation
#[derive(Parser)]
#[command(name = "content-forge")]
#[command(version)]
struct Cli {
    /// Path to a configuration file layered over config/default and config/local
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured database URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a content task and drive it to approval
    Generate(GenerateArgs),
    /// Show one task
    Status { id: Uuid },
    /// List tasks, newest first
    List {
        #[arg(long)]
        status: Vec<TaskStatus>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Show the stage history of a task
    History { id: Uuid },
    /// List tasks awaiting a decision, oldest first
    Pending,
    /// Approve a task and publish it
    Approve(DecisionArgs),
    /// Reject a task
    Reject(DecisionArgs),
    /// Cancel a task that has not reached approval
    Cancel { id: Uuid },
    /// Drive every interrupted task until it settles
    Resume,
    /// Curate the training corpus
    #[command(subcommand)]
    Training(TrainingCommand),
    /// Probe backends and show the routing order per stage
    Backends,
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long)]
    topic: String,
    /// Target length in words
    #[arg(long, default_value_t = 800)]
    length: u32,
    #[arg(long, default_value = "informative")]
    style: ContentStyle,
    #[arg(long = "keyword")]
    keywords: Vec<String>,
    /// Preferred backend for a stage, as `stage=backend_id`
    #[arg(long = "model", value_parser = parse_stage_model)]
    models: Vec<(Stage, String)>,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    max_refinements: Option<u32>,
    #[arg(long)]
    budget: Option<f64>,
    /// Persist the task without driving it and print its id; `resume` drives it later
    #[arg(long)]
    no_wait: bool,
}

#[derive(Args)]
struct DecisionArgs {
    id: Uuid,
    #[arg(long)]
    reviewer: String,
    #[arg(long)]
    feedback: Option<String>,
}

#[derive(Subcommand)]
enum TrainingCommand {
    /// Add or remove tags on examples
    Tag {
        #[arg(required = true)]
        ids: Vec<Uuid>,
        #[arg(long = "tag", required = true)]
        tags: Vec<String>,
        #[arg(long)]
        remove: bool,
    },
    /// List examples matching a filter
    Filter {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print ids only
        #[arg(long)]
        ids_only: bool,
    },
    /// Freeze the examples matching a filter under a name
    Snapshot {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// List snapshots
    Snapshots,
    /// Write a snapshot as JSON Lines
    Export {
        id: Uuid,
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Corpus statistics
    Stats,
}

#[derive(Args)]
struct FilterArgs {
    /// Required tag; repeat for several
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// At least one of these tags
    #[arg(long = "any-tag")]
    any_tags: Vec<String>,
    #[arg(long = "exclude-tag")]
    exclude_tags: Vec<String>,
    #[arg(long)]
    success: Option<bool>,
    #[arg(long)]
    min_score: Option<f64>,
    #[arg(long)]
    topic: Option<String>,
    #[arg(long)]
    status: Option<TaskStatus>,
}

impl From<FilterArgs> for ExampleFilter {
    fn from(args: FilterArgs) -> Self {
        ExampleFilter {
            all_tags: args.tags,
            any_tags: args.any_tags,
            exclude_tags: args.exclude_tags,
            success: args.success,
            min_score: args.min_score,
            topic_contains: args.topic,
            status: args.status,
            created_after: None,
        }
    }
}

impl Command {
    /// Commands that run pipeline stages in this process
    fn drives_tasks(&self) -> bool {
        match self {
            Command::Generate(args) => !args.no_wait,
            Command::Resume => true,
            _ => false,
        }
    }
}

fn parse_stage_model(raw: &str) -> std::result::Result<(Stage, String), String> {
    let (stage, backend) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected stage=backend_id, got '{}'", raw))?;
    let stage = stage.trim().parse::<Stage>().map_err(|e| e.to_string())?;
    Ok((stage, backend.trim().to_string()))
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_with(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    let _guard = logging::init(&config.logging)?;
    info!("Content Forge {}", env!("CARGO_PKG_VERSION"));

    let mut app = Application::new(config)
        .await
        .context("Failed to initialize application")?;
    if cli.command.drives_tasks() {
        app.start_availability_refresh();
    }
    let outcome = run(&app, cli.command).await;
    if let Err(e) = &outcome {
        error!("Command failed: {:#}", e);
    }
    app.shutdown().await;
    outcome
}

async fn run(app: &Application, command: Command) -> Result<()> {
    let engine = app.engine();
    let orchestrator = engine.orchestrator();

    match command {
        Command::Generate(args) => {
            let mut builder = TaskInput::builder()
                .topic(args.topic)
                .target_length(args.length)
                .style(args.style)
                .keywords(args.keywords);
            for (stage, backend) in args.models {
                builder = builder.stage_model(stage, backend);
            }
            if let Some(threshold) = args.threshold {
                builder = builder.quality_threshold(threshold);
            }
            if let Some(max) = args.max_refinements {
                builder = builder.max_refinements(max);
            }
            if let Some(budget) = args.budget {
                builder = builder.budget_ceiling(budget);
            }
            let input = builder.build()?;

            if args.no_wait {
                let id = orchestrator.submit(input).await?;
                print(&json!({ "id": id }))
            } else {
                print(&orchestrator.create_and_wait(input).await?)
            }
        }
        Command::Status { id } => print(&orchestrator.get(id).await?),
        Command::List {
            status,
            topic,
            offset,
            limit,
        } => {
            let filter = TaskFilter {
                statuses: status,
                topic_contains: topic,
                ..Default::default()
            };
            print(&orchestrator.list(&filter, Pagination::new(offset, limit)).await?)
        }
        Command::History { id } => print(&orchestrator.history(id).await?),
        Command::Pending => print(&engine.approvals().pending().await?),
        Command::Approve(args) => {
            let mut decision = Decision::approve(args.reviewer);
            if let Some(feedback) = args.feedback {
                decision = decision.with_feedback(feedback);
            }
            print(&engine.approvals().decide(args.id, decision).await?)
        }
        Command::Reject(args) => {
            let mut decision = Decision::reject(args.reviewer);
            if let Some(feedback) = args.feedback {
                decision = decision.with_feedback(feedback);
            }
            print(&engine.approvals().decide(args.id, decision).await?)
        }
        Command::Cancel { id } => print(&orchestrator.cancel(id).await?),
        Command::Resume => {
            let resumed = app.resume_and_settle().await?;
            print(&json!({ "resumed": resumed }))
        }
        Command::Training(command) => run_training(app, command).await,
        Command::Backends => {
            let router = engine.router();
            let available = router.refresh_availability().await;
            let registry = router.registry();
            let backends: Vec<_> = registry
                .descriptors()
                .into_iter()
                .map(|descriptor| {
                    let last_success = registry.last_success(&descriptor.id);
                    json!({ "backend": descriptor, "last_success": last_success })
                })
                .collect();
            let routing: serde_json::Map<String, serde_json::Value> = [
                Stage::Research,
                Stage::Draft,
                Stage::QualityReview,
                Stage::Refine,
                Stage::Format,
            ]
            .into_iter()
            .map(|stage| {
                let order: Vec<String> = router
                    .rank(stage, None)
                    .into_iter()
                    .map(|descriptor| descriptor.id)
                    .collect();
                (stage.to_string(), json!(order))
            })
            .collect();
            print(&json!({
                "available": available,
                "backends": backends,
                "routing": routing,
            }))
        }
    }
}

async fn run_training(app: &Application, command: TrainingCommand) -> Result<()> {
    let capture = app.engine().capture();

    match command {
        TrainingCommand::Tag { ids, tags, remove } => {
            let mode = if remove { TagMode::Remove } else { TagMode::Add };
            let changed = capture.tag(&ids, &tags, mode).await?;
            print(&json!({ "changed": changed }))
        }
        TrainingCommand::Filter { filter, ids_only } => {
            let filter = ExampleFilter::from(filter);
            if ids_only {
                print(&capture.filter(&filter).await?)
            } else {
                print(&capture.examples(&filter).await?)
            }
        }
        TrainingCommand::Snapshot { name, filter } => {
            let snapshot = capture
                .snapshot(&ExampleFilter::from(filter), &name)
                .await?;
            print(&json!({
                "id": snapshot.id,
                "name": snapshot.name,
                "examples": snapshot.len(),
                "digest": snapshot.digest,
            }))
        }
        TrainingCommand::Snapshots => print(&capture.snapshots().await?),
        TrainingCommand::Export { id, output } => {
            let jsonl = capture.export_snapshot(id).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, jsonl)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(snapshot_id = %id, path = %path.display(), "Exported snapshot");
                    print(&json!({ "path": path }))
                }
                None => {
                    print!("{}", jsonl);
                    Ok(())
                }
            }
        }
        TrainingCommand::Stats => print(&capture.stats().await?),
    }
}
