pub mod http;

use crate::config::ApiConfig;
use crate::models::Dataset;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

use self::http::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable market data source abstraction.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch the raw JSON payload for one symbol/dataset pair.
    async fn fetch_series(&self, dataset: Dataset, symbol: &str) -> Result<Value>;
}

// ── Provider-level failures ───────────────────────────────────────────────────

/// Failure reported inside an otherwise well-formed payload. Fails the task,
/// never the sweep.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),
}

/// Pull the dataset's series object out of a raw payload.
///
/// An explicit `Error Message` or rate-limit `Note` is a failure; a payload
/// that simply lacks the series key means "no data" and yields `None`.
pub fn extract_series(dataset: Dataset, payload: &Value) -> Result<Option<&Map<String, Value>>, ApiError> {
    if let Some(msg) = payload.get("Error Message").and_then(Value::as_str) {
        return Err(ApiError::Provider(msg.to_string()));
    }
    if let Some(note) = payload.get("Note").and_then(Value::as_str) {
        return Err(ApiError::RateLimited(note.to_string()));
    }
    Ok(payload.get(dataset.series_key()).and_then(Value::as_object))
}

// ── Alpha Vantage client ──────────────────────────────────────────────────────

pub struct AlphaVantage {
    client: HttpClient,
    base_url: String,
    api_key: String,
    sma_interval: String,
    sma_time_period: u32,
}

impl AlphaVantage {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            sma_interval: config.sma_interval.clone(),
            sma_time_period: config.sma_time_period,
        })
    }

    fn query_url(&self, dataset: Dataset, symbol: &str) -> Result<Url> {
        let mut params: Vec<(&str, String)> = vec![
            ("function", dataset.function().to_string()),
            ("symbol", symbol.to_string()),
        ];

        match dataset {
            Dataset::DailySeries => {}
            Dataset::IntradaySeries => params.push(("interval", "5min".to_string())),
            Dataset::SmaIndicator => {
                params.push(("interval", self.sma_interval.clone()));
                params.push(("time_period", self.sma_time_period.to_string()));
                params.push(("series_type", "close".to_string()));
            }
        }

        params.push(("apikey", self.api_key.clone()));

        Url::parse_with_params(&self.base_url, &params)
            .with_context(|| format!("Bad API base URL {:?}", self.base_url))
    }
}

#[async_trait]
impl MarketDataSource for AlphaVantage {
    async fn fetch_series(&self, dataset: Dataset, symbol: &str) -> Result<Value> {
        let url = self.query_url(dataset, symbol)?;
        // Log symbol/dataset only: the full URL embeds the key.
        debug!("Fetching {} for {}", dataset, symbol);

        self.client
            .get_json(url)
            .await
            .with_context(|| format!("{} fetch failed for {}", dataset, symbol))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
