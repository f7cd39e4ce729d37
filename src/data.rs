//! Market data sources
//!
//! The validator only depends on the `MarketDataSource` trait. Two local
//! implementations live here: CSV files on disk (same layout the data
//! download tooling writes) and a fixed in-memory map. The Binance-backed
//! source lives in `crate::binance`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::{PriceBar, Symbol, Timeframe};

/// Provider of ascending bar sequences for a symbol and timeframe
///
/// Implementations should report rate limits and network problems as
/// `FetchError::Transient` and unknown symbols as `FetchError::Permanent`.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch up to `lookback` most recent bars, ascending by timestamp
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<PriceBar>, FetchError>;

    fn name(&self) -> &str;
}

/// Load OHLCV bars from a CSV file (datetime,open,high,low,close,volume)
///
/// Rows failing bar validation are skipped with a warning.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<PriceBar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).context("Failed to open CSV file")?;

    let mut bars = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str)
            .context(format!("Failed to parse datetime: {}", dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .context(format!("Missing {} column", name))?
                .trim()
                .parse()
                .context(format!("Failed to parse {}", name))
        };

        let open = field(1, "open")?;
        let high = field(2, "high")?;
        let low = field(3, "low")?;
        let close = field(4, "close")?;
        let volume = field(5, "volume")?;

        match PriceBar::new(datetime, open, high, low, close, volume) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid bar at row {} in {:?}: {}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid bars in {:?}",
            invalid_count,
            path.file_name().unwrap_or_default()
        );
    }

    bars.sort_by_key(|b| b.datetime);
    bars.dedup_by_key(|b| b.datetime);

    Ok(bars)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    let ndt = date
        .and_hms_opt(0, 0, 0)
        .context("Invalid midnight timestamp")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

/// Keep the last `lookback` bars
fn tail(mut bars: Vec<PriceBar>, lookback: usize) -> Vec<PriceBar> {
    if bars.len() > lookback {
        bars.drain(..bars.len() - lookback);
    }
    bars
}

/// Reads `{dir}/{SYMBOL}_{interval}.csv`
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    dir: PathBuf,
}

impl CsvDataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &Symbol, interval: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", symbol, interval))
    }
}

#[async_trait]
impl MarketDataSource for CsvDataSource {
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<PriceBar>, FetchError> {
        let path = self.path_for(symbol, interval);
        if !path.exists() {
            return Err(FetchError::Permanent(format!(
                "no data file {} for {} timeframe",
                path.display(),
                timeframe
            )));
        }

        let bars = tokio::task::spawn_blocking(move || load_csv(&path))
            .await
            .map_err(|e| FetchError::Transient(format!("CSV loader task failed: {}", e)))?
            .map_err(|e| FetchError::Transient(format!("{:#}", e)))?;

        debug!(
            "Loaded {} {} bars for {} from CSV",
            bars.len(),
            timeframe,
            symbol
        );
        Ok(tail(bars, lookback))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Fixed bars per (symbol, timeframe); useful for replays and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    bars: HashMap<(Symbol, Timeframe), Vec<PriceBar>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: Symbol, timeframe: Timeframe, bars: Vec<PriceBar>) -> Self {
        self.insert(symbol, timeframe, bars);
        self
    }

    pub fn insert(&mut self, symbol: Symbol, timeframe: Timeframe, bars: Vec<PriceBar>) {
        self.bars.insert((symbol, timeframe), bars);
    }
}

#[async_trait]
impl MarketDataSource for InMemoryDataSource {
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        _interval: &str,
        lookback: usize,
    ) -> Result<Vec<PriceBar>, FetchError> {
        self.bars
            .get(&(symbol.clone(), timeframe))
            .cloned()
            .map(|bars| tail(bars, lookback))
            .ok_or_else(|| {
                FetchError::Permanent(format!("no {} bars for {}", timeframe, symbol))
            })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "datetime,open,high,low,close,volume").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        path
    }

    #[test]
    fn test_load_csv_skips_invalid_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "BTC_1d.csv",
            &[
                "2024-01-02 00:00:00,101,102,100,101.5,10",
                "2024-01-01 00:00:00,100,101,99,100.5,10",
                // high below low
                "2024-01-03 00:00:00,100,99,101,100,10",
            ],
        );

        let bars = load_csv(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].datetime < bars[1].datetime);
        assert_eq!(bars[1].close, 101.5);
    }

    #[test]
    fn test_load_csv_accepts_rfc3339_and_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "ETH_1d.csv",
            &[
                "2024-01-01T00:00:00Z,100,101,99,100.5,10",
                "2024-01-02,101,102,100,101.5,10",
            ],
        );
        assert_eq!(load_csv(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_csv_source_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "BTC_1h.csv",
            &[
                "2024-01-01 00:00:00,100,101,99,100,10",
                "2024-01-01 01:00:00,100,101,99,100.2,10",
                "2024-01-01 02:00:00,100,101,99,100.4,10",
            ],
        );

        let source = CsvDataSource::new(dir.path());
        let bars = source
            .get_bars(&Symbol::new("BTC"), Timeframe::Medium, "1h", 2)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 100.4);
    }

    #[tokio::test]
    async fn test_csv_source_missing_file_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvDataSource::new(dir.path());
        let err = source
            .get_bars(&Symbol::new("NOPE"), Timeframe::Daily, "1d", 10)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let bar = PriceBar::new_unchecked(Utc::now(), 1.0, 1.0, 1.0, 1.0, 1.0);
        let source = InMemoryDataSource::new().with_bars(
            Symbol::new("BTC"),
            Timeframe::Daily,
            vec![bar.clone()],
        );
        let bars = source
            .get_bars(&Symbol::new("BTC"), Timeframe::Daily, "1d", 10)
            .await
            .unwrap();
        assert_eq!(bars, vec![bar]);
        assert!(source
            .get_bars(&Symbol::new("BTC"), Timeframe::Medium, "1h", 10)
            .await
            .is_err());
    }
}
