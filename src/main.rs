mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use curator::adapters::AllowAll;
use curator::config::CuratorConfig;
use curator::lifecycle::{LogPublisher, Stage, Verdict};
use curator::model::{WorkItem, rank};
use curator::pipeline::{HandlerRegistry, Pipeline, PipelineEngine};
use curator::scoring::{KeywordScorer, Keywords, Scorer};
use curator::store::MemoryStore;
use curator::{Curator, ScoreItemsHandler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "curator=debug" } else { "curator=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(policy) = cli.policy {
        config.scoring.fallback_policy = policy.into();
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.retry_queue.max_attempts = max_attempts;
    }
    config.validate()?;

    match cli.command {
        Command::Score {
            items,
            primary,
            secondary,
        } => score(config, &items, primary, secondary).await,
        Command::Run { pipeline, payload } => run(&config, &pipeline, payload.as_deref()).await,
        Command::Demo => demo(config).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<CuratorConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} not found", path.display());
            }
            CuratorConfig::load_from(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(CuratorConfig::load()?),
    }
}

fn keyword_curator(config: &CuratorConfig) -> Result<Arc<Curator>> {
    let scorer = KeywordScorer::from_config(&config.scoring)?;
    Ok(Arc::new(Curator::new(
        Arc::new(MemoryStore::default()),
        Arc::new(scorer),
        Arc::new(AllowAll),
        Arc::new(LogPublisher),
        config,
    )))
}

async fn score(
    mut config: CuratorConfig,
    path: &Path,
    primary: Vec<String>,
    secondary: Vec<String>,
) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let items: Vec<WorkItem> =
        serde_json::from_str(&raw).with_context(|| format!("parsing items in {}", path.display()))?;

    if !primary.is_empty() || !secondary.is_empty() {
        config.scoring.keywords = Keywords { primary, secondary };
    }
    let scorer = KeywordScorer::from_config(&config.scoring)?;
    let results = scorer.score_batch(&items).await?;
    info!(items = results.len(), "items scored");
    ui::print_ranking(&rank(&results));
    Ok(())
}

async fn run(config: &CuratorConfig, path: &Path, payload: Option<&str>) -> Result<()> {
    let pipeline = Pipeline::load(path).with_context(|| format!("loading pipeline {}", path.display()))?;
    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(raw).context("--payload is not valid JSON")?,
        None => json!({}),
    };

    let mut handlers = HandlerRegistry::new();
    handlers.register("score_items", ScoreItemsHandler::new(keyword_curator(config)?, "cli"));
    handlers.register_fn("echo", |ctx| Ok(ctx.input().clone()));

    let progress = ui::RunProgress::start(&pipeline.name, pipeline.steps.len());
    let bar = progress.bar();
    let engine = PipelineEngine::new(handlers, &config.pipeline)?
        .with_progress(move |done, _total| bar.set_position(done as u64));

    let execution = engine.run(&pipeline, payload).await;
    progress.complete(&execution);
    println!("{}", serde_json::to_string_pretty(execution.result())?);

    execution.into_result()?;
    Ok(())
}

async fn demo(mut config: CuratorConfig) -> Result<()> {
    if config.scoring.keywords == Keywords::default() {
        config.scoring.keywords = Keywords::new(&["rust", "async"], &["tokio", "performance"]);
    }
    let curator = keyword_curator(&config)?;
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();

    let items = vec![
        WorkItem::new("Async Rust in production", "https://example.com/async-rust")
            .with_source("blog")
            .with_published(today.clone())
            .with_body(
                "Lessons from running tokio services under load: backpressure, \
                 cancellation and the performance cost of careless locking across \
                 await points. We walk through three incidents, what the traces \
                 showed and which async patterns we now avoid.",
            ),
        WorkItem::new("Celebrity spotted at cafe", "https://example.com/gossip")
            .with_source("tabloid"),
        WorkItem::new("Rust 2024 edition notes", "https://example.com/edition")
            .with_source("news")
            .with_published(today),
    ];

    println!("Ingesting and scoring {} items", items.len());
    let report = curator.process_batch(items, "demo").await?;
    ui::print_ranking(&report.ranking());

    let duplicate = WorkItem::new("Async Rust in production (repost)", "https://example.com/async-rust");
    let again = curator.process_batch(vec![duplicate], "demo").await?;
    println!("Re-ingest skipped {} duplicate(s)", again.skipped.len());

    let lifecycle = curator.lifecycle();
    for record in lifecycle.list(Some(Stage::Archived(Verdict::Accepted))).await? {
        lifecycle.approve(record.id, "editor").await?;
        lifecycle.publish(record.id, "publisher").await?;
    }
    for record in lifecycle.list(None).await? {
        ui::print_audit(&lifecycle.audit(record.id).await?);
    }
    Ok(())
}
