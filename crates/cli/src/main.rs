mod cli;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitecrawl_core::{
    load_config, normalize_url, validate_config, Config, Crawler, LogFormat, ProcessTestRunner,
    ResultStore, ShutdownController, SqliteResultStore, SqliteSiteStore,
};

use cli::{Cli, Command, RunArgs};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(config.logging.format);
    info!("Configuration loaded from {:?}", cli.config);
    info!("Database path: {:?}", config.database.path);

    match cli.command {
        Command::Run(args) => run_crawl(&config, args).await,
        Command::Incomplete { crawl_id } => list_incomplete(&config, &crawl_id),
        Command::AddSite { id, url } => add_site(&config, &id, &url),
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run_crawl(config: &Config, args: RunArgs) -> Result<()> {
    let sites = Arc::new(
        SqliteSiteStore::new(&config.database.path).context("Failed to open site store")?,
    );
    let results = Arc::new(
        SqliteResultStore::new(&config.database.path)
            .context("Failed to open result store")?
            .with_policy(config.crawler.upsert_policy()),
    );
    let runner = Arc::new(ProcessTestRunner::new(config.runner.clone()));
    info!("Running test programs from {:?}", config.runner.tests_dir);

    let shutdown = ShutdownController::new();
    let signals = shutdown
        .listen_for_signals()
        .context("Failed to install signal handlers")?;

    let crawler = Crawler::new(
        config.crawler.clone(),
        sites,
        results,
        runner,
        shutdown.token(),
    );
    let outcome = crawler.run_crawl(&args.crawl_id).await;
    signals.abort();

    if let Some(path) = &args.metrics_file {
        match metrics::write_metrics(path) {
            Ok(()) => info!("Metrics written to {:?}", path),
            Err(e) => warn!("Failed to write metrics: {:#}", e),
        }
    }

    let summary = outcome.with_context(|| format!("Crawl {} failed", args.crawl_id))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to encode summary")?
    );
    Ok(())
}

fn list_incomplete(config: &Config, crawl_id: &str) -> Result<()> {
    let results =
        SqliteResultStore::new(&config.database.path).context("Failed to open result store")?;
    let documents = results
        .fetch_incomplete(crawl_id)
        .with_context(|| format!("Failed to query crawl {}", crawl_id))?;

    for document in &documents {
        let failed: Vec<&str> = document
            .tests
            .iter()
            .filter(|t| !t.status.is_success())
            .map(|t| t.test_name.as_str())
            .collect();
        println!("{}\t{}", document.site_id, failed.join(","));
    }
    info!(
        "{} sites of crawl {} have non-success tests",
        documents.len(),
        crawl_id
    );
    Ok(())
}

fn add_site(config: &Config, id: &str, url: &str) -> Result<()> {
    normalize_url(url).with_context(|| format!("Invalid URL for site {}", id))?;

    let sites =
        SqliteSiteStore::new(&config.database.path).context("Failed to open site store")?;
    let inserted = sites
        .upsert_site(id, url)
        .with_context(|| format!("Failed to save site {}", id))?;

    if inserted {
        info!("Added site {} ({})", id, url);
    } else {
        info!("Site {} already registered, URL is now {}", id, url);
    }
    Ok(())
}
