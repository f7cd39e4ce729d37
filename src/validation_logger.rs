//! Append-only store of validation decisions
//!
//! One JSON line per validation, written to
//! `{records_dir}/{fast_interval}/validation.YYYY-MM-DD.jsonl`. The day
//! rollover is handled by `tracing_appender`'s daily rotation, with one
//! appender per partition.
//!
//! `log` never fails: write errors are reported through `tracing` and the
//! decision is returned to the caller unchanged.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::indicators::IndicatorSnapshot;
use crate::validator::{ValidationResult, ValidationStatus};
use crate::{Score, Symbol, Timeframe};

pub const EVENT_NAME: &str = "mtf_validation";

const FILE_PREFIX: &str = "validation";
const FILE_SUFFIX: &str = "jsonl";

/// Score and indicator context for one weighted timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeRecord {
    #[serde(with = "rust_decimal::serde::float")]
    pub weight: Decimal,
    /// Absent when the timeframe could not be fetched
    pub score: Option<Score>,
    pub snapshot: Option<IndicatorSnapshot>,
}

/// Self-contained record of one validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub event: String,
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub decision: ValidationStatus,
    pub passed: bool,
    pub aggregate_score: Score,
    pub current_price: f64,
    pub timeframes: BTreeMap<Timeframe, TimeframeRecord>,
    pub fast_snapshot: Option<IndicatorSnapshot>,
    pub reasons: Vec<String>,
    pub validation_duration_ms: u64,
    pub degraded_mode: bool,
    pub retries_attempted: u32,
    pub failed_timeframes: Vec<Timeframe>,
}

impl ValidationRecord {
    pub fn from_result(result: &ValidationResult, duration_ms: u64) -> Self {
        let timeframes = result
            .weights
            .iter()
            .map(|(tf, weight)| {
                let record = TimeframeRecord {
                    weight: *weight,
                    score: result.timeframe_scores.get(tf).copied(),
                    snapshot: result.snapshots.get(tf).cloned(),
                };
                (*tf, record)
            })
            .collect();

        ValidationRecord {
            event: EVENT_NAME.to_string(),
            symbol: result.symbol.clone(),
            timestamp: result.timestamp,
            decision: result.status,
            passed: result.passed,
            aggregate_score: result.aggregate_score,
            current_price: result.current_price,
            timeframes,
            fast_snapshot: result.fast_snapshot.clone(),
            reasons: result.reasons.clone(),
            validation_duration_ms: duration_ms,
            degraded_mode: result.is_degraded(),
            retries_attempted: result.retries_attempted,
            failed_timeframes: result.degraded_timeframes.clone(),
        }
    }
}

/// Writes validation records partitioned by fast interval and day
pub struct ValidationLogger {
    records_dir: Option<PathBuf>,
    appenders: Mutex<HashMap<String, RollingFileAppender>>,
}

impl std::fmt::Debug for ValidationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationLogger")
            .field("records_dir", &self.records_dir)
            .finish()
    }
}

impl ValidationLogger {
    pub fn new(records_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: Some(records_dir.into()),
            appenders: Mutex::new(HashMap::new()),
        }
    }

    /// Logger that only emits the tracing summary
    pub fn disabled() -> Self {
        Self {
            records_dir: None,
            appenders: Mutex::new(HashMap::new()),
        }
    }

    pub fn records_dir(&self) -> Option<&Path> {
        self.records_dir.as_deref()
    }

    /// Directory holding the daily files for one partition
    pub fn partition_dir(&self, fast_interval: &str) -> Option<PathBuf> {
        self.records_dir
            .as_ref()
            .map(|dir| dir.join(partition_name(fast_interval)))
    }

    /// Record a decision; errors are reported and swallowed
    pub fn log(&self, result: &ValidationResult, duration_ms: u64) {
        let record = ValidationRecord::from_result(result, duration_ms);

        info!(
            event = EVENT_NAME,
            symbol = %record.symbol,
            decision = %record.decision,
            aggregate_score = %record.aggregate_score,
            degraded_mode = record.degraded_mode,
            retries_attempted = record.retries_attempted,
            validation_duration_ms = duration_ms,
            "Validation decision"
        );

        if let Err(e) = self.write(&record, &result.fast_interval) {
            error!(
                "Failed to write validation record for {}: {:#}",
                record.symbol, e
            );
        }
    }

    fn write(&self, record: &ValidationRecord, fast_interval: &str) -> Result<()> {
        let Some(dir) = self.records_dir.as_ref() else {
            return Ok(());
        };

        let line = serde_json::to_string(record).context("Failed to serialize record")?;

        let mut appenders = self
            .appenders
            .lock()
            .map_err(|_| anyhow!("validation record writer lock poisoned"))?;

        let appender = match appenders.entry(partition_name(fast_interval)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let partition = dir.join(entry.key());
                std::fs::create_dir_all(&partition).context(format!(
                    "Failed to create record directory {}",
                    partition.display()
                ))?;
                let appender = RollingFileAppender::builder()
                    .rotation(Rotation::DAILY)
                    .filename_prefix(FILE_PREFIX)
                    .filename_suffix(FILE_SUFFIX)
                    .build(&partition)
                    .context("Failed to open daily record file")?;
                entry.insert(appender)
            }
        };

        writeln!(appender, "{}", line).context("Failed to append record")?;
        appender.flush().context("Failed to flush record")?;
        Ok(())
    }
}

fn partition_name(fast_interval: &str) -> String {
    let name: String = fast_interval
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if name.is_empty() {
        Timeframe::Fast.as_str().to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn result(status: ValidationStatus) -> ValidationResult {
        let mut weights = BTreeMap::new();
        weights.insert(Timeframe::Daily, dec!(0.6));
        weights.insert(Timeframe::Medium, dec!(0.4));

        let mut timeframe_scores = BTreeMap::new();
        timeframe_scores.insert(Timeframe::Daily, Score::half());

        ValidationResult {
            symbol: Symbol::new("ETHUSDT"),
            status,
            aggregate_score: Score::half(),
            passed: false,
            current_price: 3100.0,
            weights,
            timeframe_scores,
            snapshots: BTreeMap::new(),
            fast_snapshot: None,
            fast_interval: "5m".to_string(),
            reasons: vec!["medium timeframe unavailable after 3 attempts".to_string()],
            degraded_timeframes: vec![Timeframe::Medium],
            retries_attempted: 2,
            timestamp: Utc::now(),
        }
    }

    fn read_lines(dir: &Path) -> Vec<String> {
        let mut lines = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("validation."));
            assert!(name.ends_with(".jsonl"));
            let contents = std::fs::read_to_string(&path).unwrap();
            lines.extend(contents.lines().map(str::to_string));
        }
        lines
    }

    #[test]
    fn test_record_from_result() {
        let record = ValidationRecord::from_result(&result(ValidationStatus::Degraded), 42);
        assert_eq!(record.event, EVENT_NAME);
        assert!(record.degraded_mode);
        assert_eq!(record.validation_duration_ms, 42);
        assert_eq!(record.timeframes.len(), 2);
        assert_eq!(record.timeframes[&Timeframe::Medium].score, None);
        assert_eq!(record.timeframes[&Timeframe::Daily].score, Some(Score::half()));
        assert_eq!(record.failed_timeframes, vec![Timeframe::Medium]);
    }

    #[test]
    fn test_writes_json_line_per_validation() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ValidationLogger::new(dir.path());

        logger.log(&result(ValidationStatus::Degraded), 12);
        logger.log(&result(ValidationStatus::Block), 15);

        let partition = logger.partition_dir("5m").unwrap();
        let lines = read_lines(&partition);
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["event"], "mtf_validation");
        assert_eq!(value["symbol"], "ETHUSDT");
        assert_eq!(value["decision"], "DEGRADED");
        assert_eq!(value["aggregate_score"], 0.5);
        assert_eq!(value["degraded_mode"], true);
        assert_eq!(value["retries_attempted"], 2);
        assert_eq!(value["validation_duration_ms"], 12);
        assert_eq!(value["timeframes"]["daily"]["weight"], 0.6);
        assert!(value["timeframes"]["medium"]["score"].is_null());
    }

    #[test]
    fn test_write_failure_does_not_panic() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot hold partition directories
        let logger = ValidationLogger::new(file.path());
        logger.log(&result(ValidationStatus::Block), 1);
    }

    #[test]
    fn test_disabled_logger_writes_nothing() {
        let logger = ValidationLogger::disabled();
        assert!(logger.records_dir().is_none());
        logger.log(&result(ValidationStatus::Block), 1);
    }

    #[test]
    fn test_partition_name_sanitized() {
        assert_eq!(partition_name("5m"), "5m");
        assert_eq!(partition_name("../x"), "x");
        assert_eq!(partition_name("  "), "fast");
    }
}
