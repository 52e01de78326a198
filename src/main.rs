mod config;
mod models;
mod normalize;
mod pipeline;
mod source;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::models::Dataset;
use crate::pipeline::{SyncEngine, SyncReport};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "alpha-etl", about = "Incremental Alpha Vantage market data sync", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full symbol × dataset sweep once and exit
    Sync {
        /// Ticker symbols to sync (default: configured list)
        #[arg(short, long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Dataset kinds to sync (default: all three)
        #[arg(short, long, value_delimiter = ',')]
        datasets: Vec<Dataset>,

        /// Bounded worker pool size (keep low: remote rate limits)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show database statistics
    Stats,

    /// List all stored ticker symbols
    Symbols,

    /// Apply schema migrations without syncing
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load()?;

    let filter = match cli.verbose {
        0 => "alpha_etl=info,warn",
        1 => "alpha_etl=debug,info",
        _ => "trace",
    };

    let log_file = File::options()
        .create(true)
        .append(true)
        .open(&config.log.file)
        .with_context(|| format!("Could not open log file {:?}", config.log.file))?;

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(fmt::layer().compact().with_target(false))
        .with(fmt::layer().with_writer(Arc::new(log_file)).with_ansi(false))
        .init();

    match cli.command {
        Command::Sync {
            symbols,
            datasets,
            workers,
        } => {
            config.api.require_key()?;
            if !symbols.is_empty() {
                config.pipeline.symbols = symbols;
            }
            if !datasets.is_empty() {
                config.pipeline.datasets = datasets;
            }
            if let Some(workers) = workers {
                config.pipeline.max_workers = workers;
            }

            let _t = utils::Timer::start("Market data sync");
            let report = SyncEngine::new(config).run().await?;
            print_summary(&report);
            info!(
                "Done: {} succeeded, {} failed, {} rows attempted",
                report.succeeded(),
                report.failed(),
                report.rows_attempted()
            );
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let symbols = repo.symbol_count()?;
            let daily = repo.row_count(Dataset::DailySeries)?;
            let intraday = repo.row_count(Dataset::IntradaySeries)?;
            let sma = repo.row_count(Dataset::SmaIndicator)?;
            let (min, max) = repo.daily_date_range().unwrap_or((None, None));
            println!("─────────────────────────────────────");
            println!("  alpha-etl — Database Stats");
            println!("─────────────────────────────────────");
            println!("  Symbols       : {}", utils::fmt_number(symbols));
            println!("  Daily rows    : {}", utils::fmt_number(daily));
            println!("  Intraday rows : {}", utils::fmt_number(intraday));
            println!("  SMA rows      : {}", utils::fmt_number(sma));
            println!("  Daily from    : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  Daily to      : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────────");
        }

        Command::Symbols => {
            let repo = Repository::open(&config.storage.db_path)?;
            let syms = repo.list_symbols()?;
            if syms.is_empty() {
                println!("No symbols yet — run `alpha-etl sync` first.");
            } else {
                println!("{} symbols:", syms.len());
                for s in &syms {
                    println!("  {}", s);
                }
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn print_summary(report: &SyncReport) {
    println!();
    println!("{}", "═".repeat(64));
    println!("  SYNC SUMMARY");
    println!("{}", "═".repeat(64));
    for outcome in &report.outcomes {
        println!(
            "  {:<6} | {:<16} | {:<7} | {}",
            outcome.symbol,
            outcome.dataset.to_string(),
            outcome.status(),
            outcome.message
        );
    }
    println!("{}", "═".repeat(64));
    println!(
        "  {} succeeded, {} failed out of {} tasks",
        report.succeeded(),
        report.failed(),
        report.total()
    );
    println!("{}", "═".repeat(64));
}
