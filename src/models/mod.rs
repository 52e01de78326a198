use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Dataset ───────────────────────────────────────────────────────────────────

/// One Alpha Vantage series kind. Carries the query function, the top-level
/// payload key, and the target table, so callers dispatch on the variant
/// instead of branching on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    DailySeries,
    IntradaySeries,
    SmaIndicator,
}

impl Dataset {
    pub const ALL: [Dataset; 3] = [
        Dataset::DailySeries,
        Dataset::IntradaySeries,
        Dataset::SmaIndicator,
    ];

    /// `function` query parameter.
    pub fn function(self) -> &'static str {
        match self {
            Dataset::DailySeries => "TIME_SERIES_DAILY",
            Dataset::IntradaySeries => "TIME_SERIES_INTRADAY",
            Dataset::SmaIndicator => "SMA",
        }
    }

    /// Top-level key holding the series object in the response payload.
    pub fn series_key(self) -> &'static str {
        match self {
            Dataset::DailySeries => "Time Series (Daily)",
            Dataset::IntradaySeries => "Time Series (5min)",
            Dataset::SmaIndicator => "Technical Analysis: SMA",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Dataset::DailySeries => "daily_prices",
            Dataset::IntradaySeries => "intraday_prices",
            Dataset::SmaIndicator => "sma_indicators",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dataset::DailySeries => "daily-series",
            Dataset::IntradaySeries => "intraday-series",
            Dataset::SmaIndicator => "sma-indicator",
        };
        f.write_str(name)
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

/// One OHLCV point. Daily bars keep `ts` at midnight and are stored by date;
/// intraday bars carry the full timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub symbol: String,
    pub ts: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmaPoint {
    pub symbol: String,
    pub ts: NaiveDateTime,
    pub value: f64,
}

/// Normalized records for one symbol/dataset fetch, tagged by dataset so the
/// writer cannot be handed a shape that doesn't match its table.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBatch {
    Daily(Vec<PriceBar>),
    Intraday(Vec<PriceBar>),
    Sma(Vec<SmaPoint>),
}

impl RecordBatch {
    pub fn dataset(&self) -> Dataset {
        match self {
            RecordBatch::Daily(_) => Dataset::DailySeries,
            RecordBatch::Intraday(_) => Dataset::IntradaySeries,
            RecordBatch::Sma(_) => Dataset::SmaIndicator,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Daily(bars) | RecordBatch::Intraday(bars) => bars.len(),
            RecordBatch::Sma(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record at or below the watermark.
    pub fn retain_newer_than(&mut self, watermark: NaiveDateTime) {
        match self {
            RecordBatch::Daily(bars) | RecordBatch::Intraday(bars) => {
                bars.retain(|b| b.ts > watermark)
            }
            RecordBatch::Sma(points) => points.retain(|p| p.ts > watermark),
        }
    }
}

pub fn normalize_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
