//! Maps raw Alpha Vantage series entries into typed records.
//!
//! One malformed entry (bad timestamp key, missing field, non-numeric value)
//! is skipped with a warning and never fails the surrounding dataset.

use crate::models::{Dataset, PriceBar, RecordBatch, SmaPoint};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use tracing::warn;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn normalize_series(dataset: Dataset, symbol: &str, series: &Map<String, Value>) -> RecordBatch {
    match dataset {
        Dataset::DailySeries => RecordBatch::Daily(price_bars(symbol, series, parse_date_key)),
        Dataset::IntradaySeries => {
            RecordBatch::Intraday(price_bars(symbol, series, parse_datetime_key))
        }
        Dataset::SmaIndicator => RecordBatch::Sma(sma_points(symbol, series)),
    }
}

// ── Timestamp keys ────────────────────────────────────────────────────────────

fn parse_date_key(key: &str) -> Option<NaiveDateTime> {
    NaiveDate::parse_from_str(key.trim(), DATE_FORMAT)
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

fn parse_datetime_key(key: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(key.trim(), DATETIME_FORMAT).ok()
}

/// Full timestamp first; date-only keys canonicalize to midnight.
fn parse_sma_key(key: &str) -> Option<NaiveDateTime> {
    parse_datetime_key(key).or_else(|| parse_date_key(key))
}

// ── Entry conversion ──────────────────────────────────────────────────────────

fn price_bars(
    symbol: &str,
    series: &Map<String, Value>,
    parse_key: fn(&str) -> Option<NaiveDateTime>,
) -> Vec<PriceBar> {
    let mut bars = Vec::with_capacity(series.len());
    for (key, fields) in series {
        let Some(ts) = parse_key(key) else {
            warn!("{}: unparseable timestamp {:?}, skipping entry", symbol, key);
            continue;
        };
        match price_bar(symbol, ts, fields) {
            Some(bar) => bars.push(bar),
            None => warn!("{}: invalid price fields at {}, skipping entry", symbol, key),
        }
    }
    bars
}

fn price_bar(symbol: &str, ts: NaiveDateTime, fields: &Value) -> Option<PriceBar> {
    Some(PriceBar {
        symbol: symbol.to_string(),
        ts,
        open: decimal_field(fields, "1. open")?,
        high: decimal_field(fields, "2. high")?,
        low: decimal_field(fields, "3. low")?,
        close: decimal_field(fields, "4. close")?,
        volume: integer_field(fields, "5. volume")?,
    })
}

fn sma_points(symbol: &str, series: &Map<String, Value>) -> Vec<SmaPoint> {
    let mut points = Vec::with_capacity(series.len());
    for (key, fields) in series {
        let Some(ts) = parse_sma_key(key) else {
            warn!("{}: unparseable SMA timestamp {:?}, skipping entry", symbol, key);
            continue;
        };
        match decimal_field(fields, "SMA") {
            Some(value) => points.push(SmaPoint {
                symbol: symbol.to_string(),
                ts,
                value,
            }),
            None => warn!("{}: invalid SMA value at {}, skipping entry", symbol, key),
        }
    }
    points
}

// The API serializes numbers as strings ("190.0"); accept real numbers too.
fn decimal_field(fields: &Value, key: &str) -> Option<f64> {
    match fields.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn integer_field(fields: &Value, key: &str) -> Option<i64> {
    match fields.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn midnight(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    #[test]
    fn daily_entry_maps_to_bar() {
        let series = series(json!({
            "2024-01-02": {
                "1. open": "190.0",
                "2. high": "192.0",
                "3. low": "189.0",
                "4. close": "191.5",
                "5. volume": "1000000"
            }
        }));

        let batch = normalize_series(Dataset::DailySeries, "IBM", &series);
        let RecordBatch::Daily(bars) = batch else {
            panic!("expected daily batch")
        };
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.symbol, "IBM");
        assert_eq!(bar.ts, midnight(2024, 1, 2));
        assert_eq!(bar.open, 190.0);
        assert_eq!(bar.high, 192.0);
        assert_eq!(bar.low, 189.0);
        assert_eq!(bar.close, 191.5);
        assert_eq!(bar.volume, 1_000_000);
    }

    #[test]
    fn intraday_entry_keeps_time_component() {
        let series = series(json!({
            "2024-01-02 09:35:00": {
                "1. open": "190.0",
                "2. high": "190.4",
                "3. low": "189.9",
                "4. close": "190.2",
                "5. volume": "5200"
            }
        }));

        let batch = normalize_series(Dataset::IntradaySeries, "IBM", &series);
        let RecordBatch::Intraday(bars) = batch else {
            panic!("expected intraday batch")
        };
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 35, 0)
            .unwrap();
        assert_eq!(bars[0].ts, expected);
    }

    #[test]
    fn sma_date_only_key_canonicalizes_to_midnight() {
        let series = series(json!({
            "2024-01-02": {"SMA": "150.25"}
        }));

        let batch = normalize_series(Dataset::SmaIndicator, "IBM", &series);
        let RecordBatch::Sma(points) = batch else {
            panic!("expected sma batch")
        };
        assert_eq!(points[0].ts, midnight(2024, 1, 2));
        assert_eq!(points[0].value, 150.25);
    }

    #[test]
    fn sma_full_timestamp_is_preferred() {
        let series = series(json!({
            "2024-01-02 16:00:00": {"SMA": "151.00"}
        }));

        let RecordBatch::Sma(points) = normalize_series(Dataset::SmaIndicator, "IBM", &series)
        else {
            panic!("expected sma batch")
        };
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(16, 0, 0)
            .unwrap();
        assert_eq!(points[0].ts, expected);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let series = series(json!({
            "2024-01-02": {
                "1. open": "190.0",
                "2. high": "192.0",
                "3. low": "189.0",
                "4. close": "191.5",
                "5. volume": "1000000"
            },
            "2024-01-03": {
                "1. open": "not-a-number",
                "2. high": "192.0",
                "3. low": "189.0",
                "4. close": "191.5",
                "5. volume": "1000000"
            },
            "2024-01-04": {
                // missing "4. close"
                "1. open": "190.0",
                "2. high": "192.0",
                "3. low": "189.0",
                "5. volume": "1000000"
            },
            "garbage-date": {
                "1. open": "190.0",
                "2. high": "192.0",
                "3. low": "189.0",
                "4. close": "191.5",
                "5. volume": "1000000"
            }
        }));

        let batch = normalize_series(Dataset::DailySeries, "IBM", &series);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn numeric_json_values_are_accepted() {
        let series = series(json!({
            "2024-01-02": {
                "1. open": 190.0,
                "2. high": 192.0,
                "3. low": 189.0,
                "4. close": 191.5,
                "5. volume": 1000000
            }
        }));

        let batch = normalize_series(Dataset::DailySeries, "IBM", &series);
        assert_eq!(batch.len(), 1);
    }
}
