pub mod academic;
pub mod categorize;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod file_store;
pub mod identity;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod scraping;
pub mod store;
pub mod utils;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};

use cleanup::{CleanupPolicy, CleanupStats};
use cli::{Cli, Commands};
use config::AppConfig;
use models::EventStatus;
use scraping::{Orchestrator, RunSummary, SharedStore};
use store::EventFilter;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_summary(summary: &RunSummary, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            utils::ensure_parent(path);
            let contents = serde_json::to_string_pretty(summary)?;
            fs::write(path, contents)
                .with_context(|| format!("failed to write summary to {}", path.display()))?;
            info!(path = %path.display(), "wrote run summary");
            Ok(())
        }
        None => print_json(summary),
    }
}

async fn open_shared_store(config: &AppConfig) -> Result<SharedStore> {
    let config = config.clone();
    let store = tokio::task::spawn_blocking(move || store::open_store(&config))
        .await
        .map_err(|e| anyhow!("store task failed: {e}"))??;
    Ok(Arc::new(Mutex::new(store)))
}

/// Returns false when every attempted source failed.
async fn scrape(
    config: &AppConfig,
    sources: Vec<String>,
    summary_path: Option<PathBuf>,
    dry_run: bool,
) -> Result<bool> {
    let mut orchestrator = Orchestrator::from_config(config)?;
    if !sources.is_empty() {
        orchestrator.registry_mut().retain_named(&sources)?;
    }
    if orchestrator.registry().is_empty() {
        warn!("no enabled sources to scrape");
    }
    info!(sources = ?orchestrator.registry().names(), dry_run, "starting scrape");

    let summary = if dry_run {
        orchestrator.run_all().await
    } else {
        let store = open_shared_store(config).await?;
        orchestrator.run_and_reconcile(store, Utc::now()).await
    };

    info!(
        total = summary.total_sources,
        successful = summary.successful_sources,
        events = summary.total_events,
        "scrape finished"
    );
    write_summary(&summary, summary_path.as_deref())?;
    Ok(!summary.all_failed())
}

/// Returns false when any sweep failed.
async fn cleanup(config: &AppConfig, dry_run: bool) -> Result<bool> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || -> Result<bool> {
        let mut store = store::open_store(&config)?;
        let policy = CleanupPolicy::try_from(&config.cleanup)?;
        let now = Utc::now();
        if dry_run {
            print_json(&cleanup::cleanup_stats(&*store, now, &policy)?)?;
            return Ok(true);
        }
        let report = cleanup::run_cleanup(&mut *store, now, &policy);
        for err in &report.errors {
            error!(error = %err, "cleanup sweep failed");
        }
        print_json(&report)?;
        Ok(report.is_clean())
    })
    .await
    .map_err(|e| anyhow!("cleanup task failed: {e}"))?
}

#[derive(Serialize)]
struct StoreStats {
    total: usize,
    by_status: BTreeMap<&'static str, usize>,
    cleanup: CleanupStats,
}

async fn stats(config: &AppConfig) -> Result<()> {
    let config = config.clone();
    let stats = tokio::task::spawn_blocking(move || -> Result<StoreStats> {
        let store = store::open_store(&config)?;
        let mut by_status = BTreeMap::new();
        for status in EventStatus::ALL {
            let count = store.count_matching(&EventFilter::with_statuses(&[status]))?;
            by_status.insert(status.as_str(), count);
        }
        let policy = CleanupPolicy::try_from(&config.cleanup)?;
        Ok(StoreStats {
            total: store.count_matching(&EventFilter::default())?,
            by_status,
            cleanup: cleanup::cleanup_stats(&*store, Utc::now(), &policy)?,
        })
    })
    .await
    .map_err(|e| anyhow!("stats task failed: {e}"))??;
    print_json(&stats)
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(utils::config_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::write_config(&path, &AppConfig::default())?;
    info!(path = %path.display(), "wrote default config");
    println!("{}", path.display());
    Ok(())
}

async fn execute(cli: Cli) -> Result<bool> {
    if let Commands::InitConfig { force } = &cli.command {
        init_config(cli.config.as_deref(), *force)?;
        return Ok(true);
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(kind) = cli.store {
        config.store = kind.into();
    }

    match cli.command {
        Commands::Scrape {
            sources,
            summary,
            dry_run,
        } => scrape(&config, sources, summary, dry_run).await,
        Commands::Cleanup { dry_run } => cleanup(&config, dry_run).await,
        Commands::Stats => stats(&config).await.map(|_| true),
        Commands::Sources => print_json(&scraping::list_sources(&config)).map(|_| true),
        Commands::InitConfig { .. } => Ok(true),
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(execute(cli));
    // Timed-out adapters may still hold blocking threads; do not wait on them forever.
    runtime.shutdown_timeout(Duration::from_secs(5));

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}
