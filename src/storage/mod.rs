use crate::models::{Dataset, RecordBatch};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::{debug, info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS symbols (
    symbol      VARCHAR PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS daily_prices (
    symbol      VARCHAR NOT NULL,
    date        DATE    NOT NULL,
    open        DECIMAL(15, 4) NOT NULL,
    high        DECIMAL(15, 4) NOT NULL,
    low         DECIMAL(15, 4) NOT NULL,
    close       DECIMAL(15, 4) NOT NULL,
    volume      BIGINT  NOT NULL,
    PRIMARY KEY (symbol, date),
    FOREIGN KEY (symbol) REFERENCES symbols(symbol)
);

CREATE TABLE IF NOT EXISTS intraday_prices (
    symbol      VARCHAR   NOT NULL,
    ts          TIMESTAMP NOT NULL,
    open        DECIMAL(15, 4) NOT NULL,
    high        DECIMAL(15, 4) NOT NULL,
    low         DECIMAL(15, 4) NOT NULL,
    close       DECIMAL(15, 4) NOT NULL,
    volume      BIGINT    NOT NULL,
    PRIMARY KEY (symbol, ts),
    FOREIGN KEY (symbol) REFERENCES symbols(symbol)
);

CREATE TABLE IF NOT EXISTS sma_indicators (
    symbol      VARCHAR   NOT NULL,
    ts          TIMESTAMP NOT NULL,
    sma         DECIMAL(15, 4) NOT NULL,
    PRIMARY KEY (symbol, ts),
    FOREIGN KEY (symbol) REFERENCES symbols(symbol)
);

CREATE SEQUENCE IF NOT EXISTS sync_runs_id_seq;

CREATE TABLE IF NOT EXISTS sync_runs (
    id              INTEGER PRIMARY KEY,
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    tasks_total     INTEGER DEFAULT 0,
    tasks_failed    INTEGER DEFAULT 0,
    rows_attempted  INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_daily_date    ON daily_prices (date);
CREATE INDEX IF NOT EXISTS idx_intraday_ts   ON intraday_prices (ts);
CREATE INDEX IF NOT EXISTS idx_sma_ts        ON sma_indicators (ts);
"#;

// ── Write report ──────────────────────────────────────────────────────────────

/// Result of one incremental write. `attempted` counts rows handed to the
/// store; conflict-ignored rows may make visible new rows fewer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub attempted: usize,
    pub filtered: usize,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// A second connection to the same database. Each sync task owns one:
    /// the inner `Connection` must not be shared across concurrent callers.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            conn: self.conn.try_clone().context("Failed to clone connection")?,
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn
            .execute_batch(INDEXES)
            .context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Symbols ───────────────────────────────────────────────────────────────

    /// Idempotent: concurrent calls for different symbols never conflict, and
    /// re-inserting an existing symbol is a no-op.
    pub fn ensure_symbol(&self, symbol: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO symbols (symbol) VALUES (?)",
                params![symbol],
            )
            .with_context(|| format!("ensure symbol {}", symbol))?;
        Ok(())
    }

    pub fn list_symbols(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT symbol FROM symbols ORDER BY symbol")?;
        let syms: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(syms)
    }

    // ── Watermark tracker ─────────────────────────────────────────────────────

    /// Most recent timestamp persisted for (symbol, dataset); `None` on a
    /// first-time load. Daily dates surface as midnight timestamps so the
    /// comparison type is uniform across datasets.
    pub fn last_timestamp(&self, symbol: &str, dataset: Dataset) -> Result<Option<NaiveDateTime>> {
        let sql = match dataset {
            Dataset::DailySeries => {
                "SELECT CAST(MAX(date) AS TIMESTAMP) FROM daily_prices WHERE symbol = ?"
            }
            Dataset::IntradaySeries => "SELECT MAX(ts) FROM intraday_prices WHERE symbol = ?",
            Dataset::SmaIndicator => "SELECT MAX(ts) FROM sma_indicators WHERE symbol = ?",
        };

        let mut stmt = self.conn.prepare(sql)?;
        let ts: Option<NaiveDateTime> = stmt
            .query_row(params![symbol], |r| r.get(0))
            .with_context(|| format!("watermark lookup {} {}", symbol, dataset))?;
        Ok(ts)
    }

    // ── Incremental writer ────────────────────────────────────────────────────

    /// Filter the batch against the watermark and insert the remainder in one
    /// transaction. `INSERT OR IGNORE` keeps re-runs with overlapping data
    /// duplicate-free, so a failed watermark lookup degrades to a fresh load.
    pub fn write_incremental(&self, symbol: &str, mut batch: RecordBatch) -> Result<WriteReport> {
        let dataset = batch.dataset();
        let total = batch.len();

        let watermark = match self.last_timestamp(symbol, dataset) {
            Ok(w) => w,
            Err(e) => {
                warn!(
                    "{} {}: watermark lookup failed ({:#}); treating load as fresh",
                    symbol, dataset, e
                );
                None
            }
        };

        if let Some(mark) = watermark {
            batch.retain_newer_than(mark);
        }
        let filtered = total - batch.len();

        if batch.is_empty() {
            debug!("{} {}: no rows newer than {:?}", symbol, dataset, watermark);
            return Ok(WriteReport {
                attempted: 0,
                filtered,
            });
        }

        let attempted = batch.len();
        let tx = self.conn.unchecked_transaction()?;

        match &batch {
            RecordBatch::Daily(bars) => {
                let sql = r#"
                    INSERT OR IGNORE INTO daily_prices
                        (symbol, date, open, high, low, close, volume)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                "#;
                for bar in bars {
                    tx.execute(
                        sql,
                        params![
                            bar.symbol,
                            bar.ts.date(),
                            bar.open,
                            bar.high,
                            bar.low,
                            bar.close,
                            bar.volume
                        ],
                    )
                    .with_context(|| format!("insert daily {} {}", bar.symbol, bar.ts.date()))?;
                }
            }
            RecordBatch::Intraday(bars) => {
                let sql = r#"
                    INSERT OR IGNORE INTO intraday_prices
                        (symbol, ts, open, high, low, close, volume)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                "#;
                for bar in bars {
                    tx.execute(
                        sql,
                        params![
                            bar.symbol,
                            bar.ts,
                            bar.open,
                            bar.high,
                            bar.low,
                            bar.close,
                            bar.volume
                        ],
                    )
                    .with_context(|| format!("insert intraday {} {}", bar.symbol, bar.ts))?;
                }
            }
            RecordBatch::Sma(points) => {
                let sql = "INSERT OR IGNORE INTO sma_indicators (symbol, ts, sma) VALUES (?, ?, ?)";
                for point in points {
                    tx.execute(sql, params![point.symbol, point.ts, point.value])
                        .with_context(|| format!("insert sma {} {}", point.symbol, point.ts))?;
                }
            }
        }

        tx.commit()?;
        info!(
            "{} {}: {} rows attempted ({} at or below watermark)",
            symbol, dataset, attempted, filtered
        );
        Ok(WriteReport {
            attempted,
            filtered,
        })
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn symbol_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM symbols")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn row_count(&self, dataset: Dataset) -> Result<i64> {
        let mut s = self
            .conn
            .prepare(&format!("SELECT COUNT(*) FROM {}", dataset.table()))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn daily_date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let mut s = self
            .conn
            .prepare("SELECT MIN(date), MAX(date) FROM daily_prices")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Sync run log ──────────────────────────────────────────────────────────

    pub fn begin_sync_run(&self) -> Result<i64> {
        let mut stmt = self.conn.prepare(
            r#"INSERT INTO sync_runs (id, started_at, status)
               VALUES (nextval('sync_runs_id_seq'), ?, 'running')
               RETURNING id"#,
        )?;
        let id: i64 = stmt.query_row(params![Utc::now().naive_utc()], |r| r.get(0))?;
        Ok(id)
    }

    pub fn finish_sync_run(
        &self,
        run_id: i64,
        tasks_total: usize,
        tasks_failed: usize,
        rows_attempted: usize,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE sync_runs SET
               finished_at = ?, status = ?,
               tasks_total = ?, tasks_failed = ?, rows_attempted = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if tasks_failed == 0 { "success" } else { "partial" },
                tasks_total as i64,
                tasks_failed as i64,
                rows_attempted as i64,
                run_id,
            ],
        )?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PriceBar, SmaPoint};
    use chrono::{NaiveDate, NaiveTime};

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn daily_bar(d: u32, close: f64) -> PriceBar {
        PriceBar {
            symbol: "IBM".into(),
            ts: day(d),
            open: 190.0,
            high: 192.0,
            low: 189.0,
            close,
            volume: 1_000_000,
        }
    }

    #[test]
    fn ensure_symbol_is_idempotent() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();
        repo.ensure_symbol("IBM").unwrap();
        assert_eq!(repo.symbol_count().unwrap(), 1);
        assert_eq!(repo.list_symbols().unwrap(), vec!["IBM".to_string()]);
    }

    #[test]
    fn watermark_is_none_for_fresh_symbol() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();
        for dataset in Dataset::ALL {
            assert_eq!(repo.last_timestamp("IBM", dataset).unwrap(), None);
        }
    }

    #[test]
    fn first_load_inserts_single_daily_row() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();

        let report = repo
            .write_incremental("IBM", RecordBatch::Daily(vec![daily_bar(2, 191.5)]))
            .unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(repo.row_count(Dataset::DailySeries).unwrap(), 1);

        let (close, volume): (f64, i64) = repo
            .conn
            .query_row(
                "SELECT CAST(close AS DOUBLE), volume FROM daily_prices WHERE symbol = 'IBM'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(close, 191.5);
        assert_eq!(volume, 1_000_000);
    }

    #[test]
    fn rewriting_same_batch_does_not_duplicate() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();

        let batch = RecordBatch::Daily(vec![daily_bar(2, 191.5), daily_bar(3, 192.5)]);
        repo.write_incremental("IBM", batch.clone()).unwrap();
        repo.write_incremental("IBM", batch).unwrap();

        assert_eq!(repo.row_count(Dataset::DailySeries).unwrap(), 2);
    }

    #[test]
    fn watermark_filters_old_rows() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();

        repo.write_incremental("IBM", RecordBatch::Daily(vec![daily_bar(3, 191.0)]))
            .unwrap();
        assert_eq!(repo.last_timestamp("IBM", Dataset::DailySeries).unwrap(), Some(day(3)));

        // 2 and 3 are at or below the watermark; only 4 goes through.
        let report = repo
            .write_incremental(
                "IBM",
                RecordBatch::Daily(vec![
                    daily_bar(2, 190.0),
                    daily_bar(3, 191.0),
                    daily_bar(4, 193.0),
                ]),
            )
            .unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.filtered, 2);
        assert_eq!(repo.row_count(Dataset::DailySeries).unwrap(), 2);
    }

    #[test]
    fn intraday_watermark_uses_full_timestamp() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();

        let t0 = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 35, 0)
            .unwrap();
        let bar = PriceBar {
            symbol: "IBM".into(),
            ts: t0,
            open: 190.0,
            high: 190.4,
            low: 189.9,
            close: 190.2,
            volume: 5200,
        };
        repo.write_incremental("IBM", RecordBatch::Intraday(vec![bar]))
            .unwrap();

        assert_eq!(
            repo.last_timestamp("IBM", Dataset::IntradaySeries).unwrap(),
            Some(t0)
        );
    }

    #[test]
    fn sma_rows_store_midnight_timestamps() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();

        let point = SmaPoint {
            symbol: "IBM".into(),
            ts: day(2),
            value: 150.25,
        };
        repo.write_incremental("IBM", RecordBatch::Sma(vec![point]))
            .unwrap();

        assert_eq!(
            repo.last_timestamp("IBM", Dataset::SmaIndicator).unwrap(),
            Some(day(2))
        );
        assert_eq!(repo.row_count(Dataset::SmaIndicator).unwrap(), 1);
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();
        let report = repo
            .write_incremental("IBM", RecordBatch::Daily(vec![]))
            .unwrap();
        assert_eq!(report, WriteReport::default());
    }

    #[test]
    fn sync_run_log_round_trip() {
        let repo = repo();
        let id = repo.begin_sync_run().unwrap();
        repo.finish_sync_run(id, 27, 2, 140).unwrap();

        let status: String = repo
            .conn
            .query_row("SELECT status FROM sync_runs WHERE id = ?", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(status, "partial");
    }

    #[test]
    fn clone_sees_same_database() {
        let repo = repo();
        repo.ensure_symbol("IBM").unwrap();
        let other = repo.try_clone().unwrap();
        assert_eq!(other.symbol_count().unwrap(), 1);
    }
}
