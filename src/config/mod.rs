use crate::models::Dataset;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Data source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_sma_interval")]
    pub sma_interval: String,

    #[serde(default = "default_sma_time_period")]
    pub sma_time_period: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_datasets")]
    pub datasets: Vec<Dataset>,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.alphavantage.co/query".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_sma_interval() -> String {
    "daily".to_string()
}
fn default_sma_time_period() -> u32 {
    10
}
fn default_user_agent() -> String {
    "alpha-etl/0.1 (incremental market data sync)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/stock_market.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_symbols() -> Vec<String> {
    ["AAPL", "IBM", "MSFT", "GOOGL", "AMZN", "TSLA", "NVDA", "NFLX", "INTC"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_datasets() -> Vec<Dataset> {
    Dataset::ALL.to_vec()
}
fn default_max_workers() -> usize {
    // Kept low on purpose: the free API tier allows ~5 calls/minute.
    3
}
fn default_log_file() -> PathBuf {
    PathBuf::from("alpha_etl.log")
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("ETL").separator("__"))
            .build()
            .context("Failed to assemble configuration")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration values")?;

        // Bare env vars honored for compatibility with existing deployments.
        if app_cfg.api.api_key.is_empty()
            && let Ok(key) = std::env::var("ALPHA_VANTAGE_API_KEY")
        {
            app_cfg.api.api_key = key;
        }
        if let Ok(path) = std::env::var("DUCKDB_PATH") {
            app_cfg.storage.db_path = PathBuf::from(path);
        }

        Ok(app_cfg)
    }
}

impl ApiConfig {
    /// The sync command cannot run without a key; fail fast before any work.
    pub fn require_key(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("No API key configured — set ALPHA_VANTAGE_API_KEY or ETL__API__API_KEY");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            sma_interval: default_sma_interval(),
            sma_time_period: default_sma_time_period(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            datasets: default_datasets(),
            max_workers: default_max_workers(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}
