//! Multi-timeframe signal validation
//!
//! `TimeframeValidator` takes a setup confirmed on the fast timeframe and
//! checks it against the higher timeframes:
//!
//! 1. Fetch daily and medium bars concurrently, each through the retry
//!    policy and the shared fetch gate.
//! 2. Build a fresh `IndicatorEngine` per timeframe and score the snapshot
//!    (0.5 for positive momentum, 0.5 for price above the moving average).
//! 3. Combine scores with the configured weights, re-normalized over the
//!    timeframes that could be scored.
//! 4. Decide `PASS` / `BLOCK`, or flag `DEGRADED` when a timeframe stayed
//!    unavailable after every attempt.
//!
//! Every decision is handed to the `ValidationLogger` before it is returned.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::common::{FetchGate, RetryOutcome};
use crate::config::{LatencyConfig, ValidationConfig};
use crate::data::MarketDataSource;
use crate::error::{FetchError, ValidationError, ValidatorResult};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::latency::{LatencySummary, LatencyTracker};
use crate::pattern::PatternSignal;
use crate::validation_logger::ValidationLogger;
use crate::{PriceBar, Score, Symbol, Timeframe};

/// Outcome of a validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Pass,
    Block,
    /// Decided on fewer timeframes than configured
    Degraded,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pass => "PASS",
            ValidationStatus::Block => "BLOCK",
            ValidationStatus::Degraded => "DEGRADED",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable decision returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub symbol: Symbol,
    pub status: ValidationStatus,
    pub aggregate_score: Score,
    /// Threshold decision; also meaningful when `status` is `Degraded`
    pub passed: bool,
    pub current_price: f64,
    /// Configured weights, before re-normalization
    pub weights: BTreeMap<Timeframe, Decimal>,
    pub timeframe_scores: BTreeMap<Timeframe, Score>,
    pub snapshots: BTreeMap<Timeframe, IndicatorSnapshot>,
    /// Fast-timeframe context; never weighted
    pub fast_snapshot: Option<IndicatorSnapshot>,
    /// Interval of the fast timeframe, used to partition records
    pub fast_interval: String,
    pub reasons: Vec<String>,
    pub degraded_timeframes: Vec<Timeframe>,
    pub retries_attempted: u32,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    pub fn is_degraded(&self) -> bool {
        self.status == ValidationStatus::Degraded
    }

    pub fn score(&self, timeframe: Timeframe) -> Option<Score> {
        self.timeframe_scores.get(&timeframe).copied()
    }
}

/// Per-timeframe score: 0.5 for positive momentum plus 0.5 for price above MA
pub fn score_snapshot(snapshot: &IndicatorSnapshot) -> Score {
    let mut score = Score::ZERO;
    if snapshot.momentum_positive {
        score = score + Score::half();
    }
    if snapshot.price_above_ma {
        score = score + Score::half();
    }
    score
}

/// Weighted mean of the scored timeframes
///
/// Weights are re-normalized over the timeframes present in `scores`, so a
/// missing timeframe shifts its weight onto the others instead of counting
/// as zero. Returns `Score::ZERO` when nothing carries weight.
pub fn aggregate_scores(
    weights: &BTreeMap<Timeframe, Decimal>,
    scores: &BTreeMap<Timeframe, Score>,
) -> Score {
    let weight_of = |tf: &Timeframe| weights.get(tf).copied().unwrap_or(Decimal::ZERO);

    let total_weight: Decimal = scores.keys().map(weight_of).sum();
    if total_weight <= Decimal::ZERO {
        return Score::ZERO;
    }

    let weighted: Decimal = scores.iter().map(|(tf, s)| *s * weight_of(tf)).sum();
    Score::new(weighted / total_weight)
}

/// Status and threshold decision for an aggregate score
///
/// `passed` is strictly `aggregate > threshold`; a degraded validation keeps
/// that decision but reports `Degraded` as its status.
pub fn decide(aggregate: Score, threshold: Decimal, degraded: bool) -> (ValidationStatus, bool) {
    let passed = aggregate.as_decimal() > threshold;
    let status = match (degraded, passed) {
        (true, _) => ValidationStatus::Degraded,
        (false, true) => ValidationStatus::Pass,
        (false, false) => ValidationStatus::Block,
    };
    (status, passed)
}

/// Failing indicator conditions for one snapshot, in reporting order
fn snapshot_reasons(snapshot: &IndicatorSnapshot) -> Vec<String> {
    let mut reasons = Vec::new();
    if !snapshot.momentum_positive {
        reasons.push(format!("momentum negative on {} timeframe", snapshot.timeframe));
    }
    if !snapshot.price_above_ma {
        reasons.push(format!(
            "price below moving average on {} timeframe",
            snapshot.timeframe
        ));
    }
    reasons
}

struct TimeframeFetch {
    timeframe: Timeframe,
    outcome: RetryOutcome<Vec<PriceBar>, FetchError>,
}

/// Orchestrates higher-timeframe validation for confirmed setups
///
/// Cloning is cheap; clones share the config, data source, logger, fetch
/// gate and latency tracker. Nothing mutable is shared between two
/// validations apart from the gate permits and the latency window.
#[derive(Clone)]
pub struct TimeframeValidator {
    config: Arc<ValidationConfig>,
    source: Arc<dyn MarketDataSource>,
    logger: Arc<ValidationLogger>,
    gate: FetchGate,
    latency: Arc<LatencyTracker>,
    latency_budget: LatencyConfig,
}

impl std::fmt::Debug for TimeframeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeframeValidator")
            .field("config", &self.config)
            .field("source", &self.source.name())
            .field("gate", &self.gate)
            .finish()
    }
}

impl TimeframeValidator {
    pub fn new(
        config: ValidationConfig,
        source: Arc<dyn MarketDataSource>,
        logger: Arc<ValidationLogger>,
    ) -> ValidatorResult<Self> {
        config.validate()?;

        let latency_budget = LatencyConfig::default();
        Ok(Self {
            gate: FetchGate::new(config.max_concurrent_fetches),
            latency: Arc::new(LatencyTracker::new(latency_budget.window)),
            config: Arc::new(config),
            source,
            logger,
            latency_budget,
        })
    }

    /// Replace the latency budget and reset the tracking window
    pub fn with_latency_budget(mut self, budget: LatencyConfig) -> Self {
        self.latency = Arc::new(LatencyTracker::new(budget.window));
        self.latency_budget = budget;
        self
    }

    /// Share a fetch gate with other validators using the same upstream
    pub fn with_gate(mut self, gate: FetchGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn gate(&self) -> &FetchGate {
        &self.gate
    }

    pub fn latency_summary(&self) -> LatencySummary {
        self.latency.summary()
    }

    /// Validate a setup emitted by the pattern detector
    pub async fn validate_signal(
        &self,
        signal: &PatternSignal,
        fast_bars: &[PriceBar],
    ) -> ValidatorResult<ValidationResult> {
        self.validate(&signal.symbol, signal.breakout_price, fast_bars)
            .await
    }

    /// Score `symbol` on the higher timeframes and return a decision
    ///
    /// Fails with `InvalidInput` before any fetch for an empty symbol or a
    /// non-positive price, and with `InsufficientData` when a fetched
    /// timeframe has too few bars. Fetch failures never surface as errors;
    /// they produce a `Degraded` result.
    pub async fn validate(
        &self,
        symbol: &Symbol,
        current_price: f64,
        fast_bars: &[PriceBar],
    ) -> ValidatorResult<ValidationResult> {
        let started = Instant::now();

        if symbol.is_empty() {
            return Err(ValidationError::InvalidInput(
                "symbol must not be empty".to_string(),
            ));
        }
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(ValidationError::InvalidInput(format!(
                "current price must be positive, got {}",
                current_price
            )));
        }

        if !self.config.enabled {
            debug!("Validation disabled, passing {}", symbol);
            let result = self.disabled_result(symbol, current_price);
            self.finish(&result, started);
            return Ok(result);
        }

        let (daily, medium) = tokio::join!(
            self.fetch_if_weighted(symbol, Timeframe::Daily),
            self.fetch_if_weighted(symbol, Timeframe::Medium),
        );

        let fast_snapshot = self.fast_snapshot(symbol, fast_bars);

        let mut timeframe_scores = BTreeMap::new();
        let mut snapshots = BTreeMap::new();
        let mut degraded_timeframes = Vec::new();
        let mut fetch_reasons = Vec::new();
        let mut retries_attempted = 0;
        let mut insufficient = None;

        for fetch in [daily, medium].into_iter().flatten() {
            let TimeframeFetch { timeframe, outcome } = fetch;
            retries_attempted += outcome.retries();

            let bars = match outcome.result {
                Ok(bars) => bars,
                Err(e) => {
                    let err = ValidationError::DataFetch {
                        symbol: symbol.clone(),
                        timeframe,
                        attempts: outcome.attempts,
                        message: e.to_string(),
                    };
                    warn!("{}", err);
                    fetch_reasons.push(format!(
                        "{} timeframe unavailable after {} attempts",
                        timeframe, outcome.attempts
                    ));
                    degraded_timeframes.push(timeframe);
                    continue;
                }
            };

            let engine =
                IndicatorEngine::new(symbol.clone(), timeframe, self.config.min_bars(timeframe));
            match engine.update(&bars) {
                Ok(snapshot) => {
                    timeframe_scores.insert(timeframe, score_snapshot(&snapshot));
                    snapshots.insert(timeframe, snapshot);
                }
                Err(e @ ValidationError::InsufficientData { .. }) => {
                    insufficient.get_or_insert(e);
                }
                Err(e) => {
                    warn!("Unusable {} bars for {}: {}", timeframe, symbol, e);
                    fetch_reasons.push(format!("{} timeframe returned unusable bars", timeframe));
                    degraded_timeframes.push(timeframe);
                }
            }
        }

        if let Some(err) = insufficient {
            warn!("Validation aborted for {}: {}", symbol, err);
            self.latency.record(started.elapsed());
            return Err(err);
        }

        let aggregate_score = aggregate_scores(&self.config.weights, &timeframe_scores);
        let (status, passed) = decide(
            aggregate_score,
            self.config.pass_threshold,
            !degraded_timeframes.is_empty(),
        );

        let reasons = if status == ValidationStatus::Pass {
            Vec::new()
        } else {
            let mut reasons = fetch_reasons;
            reasons.extend(snapshots.values().rev().flat_map(snapshot_reasons));
            if !passed {
                reasons.push(format!(
                    "aggregate score {} not above pass threshold {}",
                    aggregate_score, self.config.pass_threshold
                ));
            }
            reasons
        };

        let result = ValidationResult {
            symbol: symbol.clone(),
            status,
            aggregate_score,
            passed,
            current_price,
            weights: self.config.weights.clone(),
            timeframe_scores,
            snapshots,
            fast_snapshot,
            fast_interval: self.fast_interval(),
            reasons,
            degraded_timeframes,
            retries_attempted,
            timestamp: Utc::now(),
        };

        self.finish(&result, started);
        Ok(result)
    }

    async fn fetch_if_weighted(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Option<TimeframeFetch> {
        if self.config.weight(timeframe) <= Decimal::ZERO {
            return None;
        }
        let settings = self.config.settings(timeframe)?;

        let source = &self.source;
        let gate = &self.gate;
        let interval = settings.interval.as_str();
        let lookback = settings.lookback;
        let label = format!("{} {} bars", symbol, timeframe);

        let outcome = self
            .config
            .retry_policy()
            .run(&label, move |attempt| async move {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| FetchError::Transient(format!("fetch gate closed: {}", e)))?;
                debug!(
                    "Fetching {} {} bars (attempt {}, interval {})",
                    symbol, timeframe, attempt, interval
                );
                source.get_bars(symbol, timeframe, interval, lookback).await
            })
            .await;

        Some(TimeframeFetch { timeframe, outcome })
    }

    fn fast_snapshot(&self, symbol: &Symbol, bars: &[PriceBar]) -> Option<IndicatorSnapshot> {
        if bars.is_empty() {
            return None;
        }
        let engine = IndicatorEngine::new(
            symbol.clone(),
            Timeframe::Fast,
            self.config.min_bars(Timeframe::Fast),
        );
        match engine.update(bars) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("No fast snapshot for {}: {}", symbol, e);
                None
            }
        }
    }

    fn fast_interval(&self) -> String {
        self.config
            .settings(Timeframe::Fast)
            .map(|s| s.interval.clone())
            .unwrap_or_else(|| Timeframe::Fast.as_str().to_string())
    }

    fn disabled_result(&self, symbol: &Symbol, current_price: f64) -> ValidationResult {
        ValidationResult {
            symbol: symbol.clone(),
            status: ValidationStatus::Pass,
            aggregate_score: Score::ONE,
            passed: true,
            current_price,
            weights: self.config.weights.clone(),
            timeframe_scores: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            fast_snapshot: None,
            fast_interval: self.fast_interval(),
            reasons: Vec::new(),
            degraded_timeframes: Vec::new(),
            retries_attempted: 0,
            timestamp: Utc::now(),
        }
    }

    fn finish(&self, result: &ValidationResult, started: Instant) {
        let elapsed = started.elapsed();
        self.logger.log(result, elapsed.as_millis() as u64);
        self.latency.record(elapsed);

        if elapsed > Duration::from_millis(self.latency_budget.p99_budget_ms) {
            warn!(
                "Validation for {} took {}ms, above P99 budget of {}ms",
                result.symbol,
                elapsed.as_millis(),
                self.latency_budget.p99_budget_ms
            );
        }

        info!(
            "{} {} score={} retries={}",
            result.symbol, result.status, result.aggregate_score, result.retries_attempted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataSource;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rust_decimal_macros::dec;

    fn snapshot(timeframe: Timeframe, momentum: bool, above_ma: bool) -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: Symbol::new("BTCUSDT"),
            timeframe,
            price: 100.0,
            moving_average: 99.0,
            macd_line: if momentum { 0.3 } else { -0.5 },
            signal_line: None,
            histogram: None,
            vwap: 99.5,
            momentum_positive: momentum,
            price_above_ma: above_ma,
            bars_used: 40,
            timestamp: Utc::now(),
        }
    }

    fn trending_bars(n: usize, step: f64) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + step * i as f64;
                PriceBar::new_unchecked(
                    start + ChronoDuration::hours(i as i64),
                    close,
                    close + 0.5,
                    close - 0.5,
                    close,
                    1000.0,
                )
            })
            .collect()
    }

    fn default_weights() -> BTreeMap<Timeframe, Decimal> {
        ValidationConfig::default().weights
    }

    #[test]
    fn test_score_snapshot() {
        assert_eq!(score_snapshot(&snapshot(Timeframe::Daily, true, true)), Score::ONE);
        assert_eq!(score_snapshot(&snapshot(Timeframe::Daily, true, false)), Score::half());
        assert_eq!(score_snapshot(&snapshot(Timeframe::Daily, false, true)), Score::half());
        assert_eq!(score_snapshot(&snapshot(Timeframe::Daily, false, false)), Score::ZERO);
    }

    #[test]
    fn test_aggregate_bearish_daily_bullish_medium() {
        let mut scores = BTreeMap::new();
        scores.insert(Timeframe::Daily, Score::ZERO);
        scores.insert(Timeframe::Medium, Score::ONE);
        let aggregate = aggregate_scores(&default_weights(), &scores);
        assert_eq!(aggregate.as_decimal(), dec!(0.4));
    }

    #[test]
    fn test_aggregate_renormalizes_missing_timeframe() {
        let mut scores = BTreeMap::new();
        scores.insert(Timeframe::Daily, Score::half());
        let aggregate = aggregate_scores(&default_weights(), &scores);
        assert_eq!(aggregate, Score::half());
    }

    #[test]
    fn test_aggregate_empty_is_zero() {
        assert_eq!(aggregate_scores(&default_weights(), &BTreeMap::new()), Score::ZERO);
    }

    #[test]
    fn test_decide_threshold_is_strict() {
        let threshold = dec!(0.5);
        assert_eq!(decide(Score::half(), threshold, false), (ValidationStatus::Block, false));
        assert_eq!(
            decide(Score::new(dec!(0.5001)), threshold, false),
            (ValidationStatus::Pass, true)
        );
        assert_eq!(decide(Score::ONE, threshold, true), (ValidationStatus::Degraded, true));
    }

    #[test]
    fn test_snapshot_reasons() {
        let reasons = snapshot_reasons(&snapshot(Timeframe::Daily, false, false));
        assert_eq!(
            reasons,
            vec![
                "momentum negative on daily timeframe".to_string(),
                "price below moving average on daily timeframe".to_string(),
            ]
        );
        assert!(snapshot_reasons(&snapshot(Timeframe::Medium, true, true)).is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = ValidationConfig::default();
        config.weights.insert(Timeframe::Medium, dec!(0.5));
        let err = TimeframeValidator::new(
            config,
            Arc::new(InMemoryDataSource::new()),
            Arc::new(ValidationLogger::disabled()),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_rejects_invalid_input_without_fetching() {
        let validator = TimeframeValidator::new(
            ValidationConfig::default(),
            Arc::new(InMemoryDataSource::new()),
            Arc::new(ValidationLogger::disabled()),
        )
        .unwrap();

        let err = validator.validate(&Symbol::new("  "), 100.0, &[]).await.unwrap_err();
        assert!(matches!(err, ValidationError::InvalidInput(_)));

        let err = validator
            .validate(&Symbol::new("BTC"), 0.0, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidInput(_)));

        let err = validator
            .validate(&Symbol::new("BTC"), f64::NAN, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_disabled_passes_without_fetching() {
        let config = ValidationConfig {
            enabled: false,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(ValidationLogger::new(dir.path()));
        let validator = TimeframeValidator::new(
            config,
            Arc::new(InMemoryDataSource::new()),
            logger.clone(),
        )
        .unwrap();

        let result = validator.validate(&Symbol::new("BTC"), 100.0, &[]).await.unwrap();
        assert_eq!(result.status, ValidationStatus::Pass);
        assert_eq!(result.aggregate_score, Score::ONE);
        assert!(result.reasons.is_empty());

        // Still recorded: exactly one PASS line
        let partition = logger.partition_dir(&result.fast_interval).unwrap();
        let mut lines = Vec::new();
        for entry in std::fs::read_dir(&partition).unwrap() {
            let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            lines.extend(contents.lines().map(str::to_string));
        }
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["decision"], "PASS");
        assert_eq!(value["symbol"], "BTC");
        assert_eq!(value["aggregate_score"], 1.0);
    }

    #[tokio::test]
    async fn test_bullish_timeframes_pass() {
        let symbol = Symbol::new("BTC");
        let source = InMemoryDataSource::new()
            .with_bars(symbol.clone(), Timeframe::Daily, trending_bars(60, 1.0))
            .with_bars(symbol.clone(), Timeframe::Medium, trending_bars(100, 0.5));

        let validator = TimeframeValidator::new(
            ValidationConfig::default(),
            Arc::new(source),
            Arc::new(ValidationLogger::disabled()),
        )
        .unwrap();

        let result = validator.validate(&symbol, 150.0, &[]).await.unwrap();
        assert_eq!(result.status, ValidationStatus::Pass);
        assert!(result.passed);
        assert_eq!(result.aggregate_score, Score::ONE);
        assert!(result.reasons.is_empty());
        assert_eq!(result.snapshots.len(), 2);
        assert_eq!(result.retries_attempted, 0);
        assert_eq!(validator.latency_summary().count, 1);
    }
}
