//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable overrides for directories and fetch concurrency. Every field has
//! a default, so `{}` is a complete configuration.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::RetryPolicy;
use crate::error::{ValidationError, ValidatorResult};
use crate::pattern::PatternConfig;
use crate::Timeframe;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub pattern: PatternConfig,
    pub data: DataConfig,
    pub logging: LoggingConfig,
    pub latency: LatencyConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env_overrides()?;
        config
            .validation
            .validate()
            .context("Invalid validation section")?;
        config.pattern.validate().context("Invalid pattern section")?;

        Ok(config)
    }

    /// Apply `MTF_LOG_DIR`, `MTF_DATA_DIR` and `MTF_MAX_CONCURRENT_FETCHES`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("MTF_LOG_DIR") {
            self.logging.log_dir = dir;
        }
        if let Ok(dir) = std::env::var("MTF_DATA_DIR") {
            self.data.data_dir = dir;
        }
        if let Ok(value) = std::env::var("MTF_MAX_CONCURRENT_FETCHES") {
            self.validation.max_concurrent_fetches = value
                .parse()
                .context("MTF_MAX_CONCURRENT_FETCHES must be a positive integer")?;
        }
        Ok(())
    }
}

/// Per-timeframe data requirements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeSettings {
    /// Interval string passed to the data source (e.g. "5m", "1h", "1d")
    pub interval: String,
    /// Minimum bars for a statistically valid snapshot
    pub min_bars: usize,
    /// Bars requested from the data source
    pub lookback: usize,
}

impl TimeframeSettings {
    pub fn new(interval: impl Into<String>, min_bars: usize, lookback: usize) -> Self {
        Self {
            interval: interval.into(),
            min_bars,
            lookback,
        }
    }
}

/// Multi-timeframe validation configuration
///
/// Loaded once at startup and shared read-only by every validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enabled: bool,
    /// Weight per higher timeframe; the fast timeframe is not weighted
    pub weights: BTreeMap<Timeframe, Decimal>,
    #[serde(with = "rust_decimal::serde::float")]
    pub pass_threshold: Decimal,
    /// Total fetch attempts per timeframe
    pub max_retry_attempts: u32,
    /// Delay before the second attempt; doubles for each later attempt
    pub base_backoff_ms: u64,
    /// In-flight fetch bound shared by concurrent validations
    pub max_concurrent_fetches: usize,
    pub timeframes: BTreeMap<Timeframe, TimeframeSettings>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(Timeframe::Daily, dec!(0.6));
        weights.insert(Timeframe::Medium, dec!(0.4));

        let mut timeframes = BTreeMap::new();
        timeframes.insert(Timeframe::Fast, TimeframeSettings::new("5m", 35, 200));
        timeframes.insert(Timeframe::Medium, TimeframeSettings::new("1h", 72, 200));
        timeframes.insert(Timeframe::Daily, TimeframeSettings::new("1d", 30, 100));

        ValidationConfig {
            enabled: true,
            weights,
            pass_threshold: dec!(0.5),
            max_retry_attempts: 3,
            base_backoff_ms: 1000,
            max_concurrent_fetches: 4,
            timeframes,
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> ValidatorResult<()> {
        let invalid = |msg: String| Err(ValidationError::InvalidConfig(msg));

        if self.weights.contains_key(&Timeframe::Fast) {
            return invalid("fast timeframe must not carry a weight".into());
        }
        if self.weights.is_empty() {
            return invalid("at least one higher timeframe weight is required".into());
        }
        if let Some((tf, w)) = self.weights.iter().find(|(_, w)| w.is_sign_negative()) {
            return invalid(format!("weight for {} timeframe is negative: {}", tf, w));
        }

        let total: Decimal = self.weights.values().copied().sum();
        if total != Decimal::ONE {
            return invalid(format!("timeframe weights must sum to 1.0, got {}", total));
        }

        if self.pass_threshold < Decimal::ZERO || self.pass_threshold > Decimal::ONE {
            return invalid(format!(
                "pass_threshold must be within [0, 1], got {}",
                self.pass_threshold
            ));
        }
        if self.max_retry_attempts == 0 {
            return invalid("max_retry_attempts must be at least 1".into());
        }
        if self.max_concurrent_fetches == 0 {
            return invalid("max_concurrent_fetches must be at least 1".into());
        }

        for tf in self.weights.keys() {
            match self.timeframes.get(tf) {
                None => return invalid(format!("no settings for weighted {} timeframe", tf)),
                Some(settings) if settings.interval.trim().is_empty() => {
                    return invalid(format!("empty interval for {} timeframe", tf))
                }
                Some(settings) if settings.lookback < settings.min_bars => {
                    return invalid(format!(
                        "lookback ({}) below min_bars ({}) for {} timeframe",
                        settings.lookback, settings.min_bars, tf
                    ))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    pub fn weight(&self, timeframe: Timeframe) -> Decimal {
        self.weights.get(&timeframe).copied().unwrap_or(Decimal::ZERO)
    }

    /// Higher timeframes with a positive weight, fetched on every validation
    pub fn weighted_timeframes(&self) -> Vec<Timeframe> {
        self.weights
            .iter()
            .filter(|(_, w)| **w > Decimal::ZERO)
            .map(|(tf, _)| *tf)
            .collect()
    }

    pub fn settings(&self, timeframe: Timeframe) -> Option<&TimeframeSettings> {
        self.timeframes.get(&timeframe)
    }

    pub fn min_bars(&self, timeframe: Timeframe) -> usize {
        self.settings(timeframe).map(|s| s.min_bars).unwrap_or(0)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            Duration::from_millis(self.base_backoff_ms),
        )
    }
}

/// Where bars come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    #[default]
    Csv,
    Binance,
}

impl std::str::FromStr for DataSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(DataSourceKind::Csv),
            "binance" => Ok(DataSourceKind::Binance),
            other => Err(format!("unknown data source: {} (use csv or binance)", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub source: DataSourceKind,
    pub data_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            source: DataSourceKind::Csv,
            data_dir: "data".to_string(),
        }
    }
}

/// Validation record store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub feature_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_dir: "logs".to_string(),
            feature_dir: "mtf_validation".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn records_dir(&self) -> PathBuf {
        PathBuf::from(&self.log_dir).join(&self.feature_dir)
    }
}

/// Latency budget for a single validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub p95_budget_ms: u64,
    pub p99_budget_ms: u64,
    /// Recent durations kept for percentile reporting
    pub window: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        LatencyConfig {
            p95_budget_ms: 2000,
            p99_budget_ms: 5000,
            window: 1000,
        }
    }
}
