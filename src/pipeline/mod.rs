//! Sync orchestrator: fans (symbol × dataset) tasks across a bounded pool.
//!
//! ## Run shape
//!
//! Phase 1 seeds the symbols table so price rows always have a parent to
//! reference. Phase 2 runs every symbol/dataset pair independently:
//! fetch → inspect payload → normalize → incremental write. A task failure
//! never aborts its siblings; every task folds into a `TaskOutcome` and the
//! sweep always ends with a full summary.
//!
//! Idempotent: re-running against identical API responses inserts 0 new rows
//! (watermark filter + INSERT OR IGNORE).

use crate::config::AppConfig;
use crate::models::{Dataset, normalize_symbol};
use crate::normalize;
use crate::source::{self, AlphaVantage, MarketDataSource};
use crate::storage::{Repository, WriteReport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Per (symbol, dataset) result, success or failure, with a diagnostic line.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub symbol: String,
    pub dataset: Dataset,
    pub success: bool,
    pub rows_attempted: usize,
    pub message: String,
}

impl TaskOutcome {
    fn success(symbol: String, dataset: Dataset, report: WriteReport) -> Self {
        Self {
            symbol,
            dataset,
            success: true,
            rows_attempted: report.attempted,
            message: format!("{} new rows", report.attempted),
        }
    }

    fn failure(symbol: String, dataset: Dataset, message: String) -> Self {
        Self {
            symbol,
            dataset,
            success: false,
            rows_attempted: 0,
            message,
        }
    }

    pub fn status(&self) -> &'static str {
        if self.success { "SUCCESS" } else { "FAILED" }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<TaskOutcome>,
    /// Tasks that panicked and produced no outcome. Counted as failures.
    pub panicked: usize,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded() + self.panicked
    }

    pub fn total(&self) -> usize {
        self.outcomes.len() + self.panicked
    }

    pub fn rows_attempted(&self) -> usize {
        self.outcomes.iter().map(|o| o.rows_attempted).sum()
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct SyncEngine {
    config: AppConfig,
}

impl SyncEngine {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<SyncReport> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;

        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let source: Arc<dyn MarketDataSource> = Arc::new(
            AlphaVantage::new(&self.config.api).context("Failed to build API client")?,
        );

        let symbols: Vec<String> = self
            .config
            .pipeline
            .symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .collect();

        run_sync(
            repo,
            source,
            &symbols,
            &self.config.pipeline.datasets,
            self.config.pipeline.max_workers,
        )
        .await
    }
}

/// Run one full sweep. Takes the repository and source explicitly so tests
/// can substitute both.
pub async fn run_sync(
    repo: Repository,
    source: Arc<dyn MarketDataSource>,
    symbols: &[String],
    datasets: &[Dataset],
    max_workers: usize,
) -> Result<SyncReport> {
    let run_id = repo.begin_sync_run().unwrap_or(0);
    let sem = Arc::new(Semaphore::new(max_workers.max(1)));

    // ── Phase 1: seed symbols ─────────────────────────────────────────────────
    info!("=== Phase 1: seeding {} symbols ===", symbols.len());

    let mut seeds = JoinSet::new();
    for symbol in symbols {
        let repo = repo.try_clone()?;
        let sem = Arc::clone(&sem);
        let symbol = symbol.clone();
        seeds.spawn(async move {
            let result = match sem.acquire_owned().await {
                Ok(_permit) => repo.ensure_symbol(&symbol),
                Err(e) => Err(anyhow::anyhow!("worker pool closed: {e}")),
            };
            (symbol, result)
        });
    }
    while let Some(joined) = seeds.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((symbol, Err(e))) => warn!("{}: symbol seed failed: {:#}", symbol, e),
            Err(e) => error!("Symbol seed task panicked: {}", e),
        }
    }

    // ── Phase 2: symbol × dataset sweep ───────────────────────────────────────
    let total = symbols.len() * datasets.len();
    info!(
        "=== Phase 2: {} sync tasks across {} workers ===",
        total, max_workers
    );

    let mut tasks = JoinSet::new();
    for symbol in symbols {
        for &dataset in datasets {
            let repo = repo.try_clone()?;
            let source = Arc::clone(&source);
            let sem = Arc::clone(&sem);
            let symbol = symbol.clone();
            tasks.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return TaskOutcome::failure(
                            symbol,
                            dataset,
                            format!("worker pool closed: {e}"),
                        );
                    }
                };
                run_task(source.as_ref(), repo, symbol, dataset).await
            });
        }
    }

    let mut report = SyncReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                if outcome.success {
                    info!(
                        "✓ {} {}: {}",
                        outcome.symbol, outcome.dataset, outcome.message
                    );
                } else {
                    warn!(
                        "✗ {} {}: {}",
                        outcome.symbol, outcome.dataset, outcome.message
                    );
                }
                report.outcomes.push(outcome);
            }
            Err(e) => {
                error!("Sync task panicked: {}", e);
                report.panicked += 1;
            }
        }
    }

    repo.finish_sync_run(run_id, report.total(), report.failed(), report.rows_attempted())
        .ok();

    info!(
        "=== Done: {} succeeded, {} failed out of {} tasks | {} rows attempted ===",
        report.succeeded(),
        report.failed(),
        report.total(),
        report.rows_attempted(),
    );

    Ok(report)
}

/// One (symbol, dataset) unit of work. Never panics, never propagates: every
/// error becomes a failed outcome.
async fn run_task(
    source: &dyn MarketDataSource,
    repo: Repository,
    symbol: String,
    dataset: Dataset,
) -> TaskOutcome {
    match sync_one(source, repo, &symbol, dataset).await {
        Ok(report) => TaskOutcome::success(symbol, dataset, report),
        Err(e) => TaskOutcome::failure(symbol, dataset, format!("{:#}", e)),
    }
}

async fn sync_one(
    source: &dyn MarketDataSource,
    repo: Repository,
    symbol: &str,
    dataset: Dataset,
) -> Result<WriteReport> {
    let payload = source.fetch_series(dataset, symbol).await?;

    let Some(series) = source::extract_series(dataset, &payload)? else {
        warn!("{} {}: payload has no series object", symbol, dataset);
        return Ok(WriteReport::default());
    };
    if series.is_empty() {
        return Ok(WriteReport::default());
    }

    let batch = normalize::normalize_series(dataset, symbol, series);
    repo.write_incremental(symbol, batch)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
