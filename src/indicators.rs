//! Technical indicators and the per-timeframe indicator engine
//!
//! `sma` and `mean` work on whole series; the pattern detector uses them for
//! volume statistics. `IndicatorEngine` is the stateful calculator behind
//! every `IndicatorSnapshot`: it is built for exactly one symbol and one
//! timeframe, consumes one bar sequence, and is dropped.
//!
//! The engine reports:
//! - Moving average: EMA (SMA-seeded)
//! - Momentum: MACD (12/26/9 by default)
//! - Volume: cumulative VWAP over the supplied bars

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::error::{ValidationError, ValidatorResult};
use crate::{PriceBar, Symbol, Timeframe};

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Mean of a slice, `None` when empty
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

// =============================================================================
// Incremental Indicators
// =============================================================================

/// Incremental EMA seeded from the simple average of its first `period` inputs
#[derive(Debug, Clone)]
pub struct SeededEma {
    period: usize,
    multiplier: f64,
    seed_sum: f64,
    count: usize,
    value: Option<f64>,
}

impl SeededEma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            count: 0,
            value: None,
        }
    }

    pub fn next(&mut self, input: f64) -> Option<f64> {
        self.count += 1;
        self.value = match self.value {
            Some(prev) => Some((input - prev) * self.multiplier + prev),
            None => {
                self.seed_sum += input;
                (self.count == self.period).then(|| self.seed_sum / self.period as f64)
            }
        };
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: Option<f64>,
}

impl MacdValue {
    pub fn histogram(&self) -> Option<f64> {
        self.signal.map(|s| self.line - s)
    }
}

/// Incremental MACD built from three seeded EMAs
#[derive(Debug, Clone)]
pub struct MacdCalculator {
    fast: SeededEma,
    slow: SeededEma,
    signal: SeededEma,
    last: Option<MacdValue>,
}

impl MacdCalculator {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: SeededEma::new(fast_period),
            slow: SeededEma::new(slow_period),
            signal: SeededEma::new(signal_period),
            last: None,
        }
    }

    pub fn next(&mut self, input: f64) -> Option<MacdValue> {
        let fast = self.fast.next(input);
        let slow = self.slow.next(input);

        self.last = match (fast, slow) {
            (Some(f), Some(s)) => {
                let line = f - s;
                let signal = self.signal.next(line);
                Some(MacdValue { line, signal })
            }
            _ => None,
        };
        self.last
    }

    pub fn value(&self) -> Option<MacdValue> {
        self.last
    }
}

// =============================================================================
// Indicator Engine
// =============================================================================

/// Smoothing periods used by `IndicatorEngine`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorPeriods {
    pub moving_average: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            moving_average: 20,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

impl IndicatorPeriods {
    /// Bars needed before both the moving average and the MACD line exist
    pub fn warmup(&self) -> usize {
        self.moving_average.max(self.macd_slow).max(self.macd_fast)
    }
}

/// Indicator values for one timeframe at the latest bar
///
/// Built fresh for every evaluation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    /// Close of the latest bar
    pub price: f64,
    /// 20-period exponential moving average
    pub moving_average: f64,
    pub macd_line: f64,
    pub signal_line: Option<f64>,
    pub histogram: Option<f64>,
    pub vwap: f64,
    pub momentum_positive: bool,
    pub price_above_ma: bool,
    pub bars_used: usize,
    /// Timestamp of the latest bar
    pub timestamp: DateTime<Utc>,
}

/// Stateful indicator calculator for one symbol on one timeframe
///
/// `update` consumes the engine: smoothing state can never carry over into a
/// second series.
#[derive(Debug)]
pub struct IndicatorEngine {
    symbol: Symbol,
    timeframe: Timeframe,
    min_bars: usize,
    periods: IndicatorPeriods,
    moving_average: SeededEma,
    macd: MacdCalculator,
    cumulative_tp_vol: f64,
    cumulative_vol: f64,
    bars_seen: usize,
    last_bar: Option<PriceBar>,
}

impl IndicatorEngine {
    pub fn new(symbol: Symbol, timeframe: Timeframe, min_bars: usize) -> Self {
        Self::with_periods(symbol, timeframe, min_bars, IndicatorPeriods::default())
    }

    pub fn with_periods(
        symbol: Symbol,
        timeframe: Timeframe,
        min_bars: usize,
        periods: IndicatorPeriods,
    ) -> Self {
        Self {
            symbol,
            timeframe,
            min_bars,
            periods,
            moving_average: SeededEma::new(periods.moving_average),
            macd: MacdCalculator::new(periods.macd_fast, periods.macd_slow, periods.macd_signal),
            cumulative_tp_vol: 0.0,
            cumulative_vol: 0.0,
            bars_seen: 0,
            last_bar: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Bars required before `update` will produce a snapshot
    pub fn required_bars(&self) -> usize {
        self.min_bars.max(self.periods.warmup())
    }

    /// Consume the bar sequence and produce the snapshot at its last bar
    pub fn update(mut self, bars: &[PriceBar]) -> ValidatorResult<IndicatorSnapshot> {
        let required = self.required_bars();
        if bars.len() < required {
            return Err(ValidationError::InsufficientData {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                required,
                actual: bars.len(),
            });
        }

        if let Some(pos) = bars
            .windows(2)
            .position(|w| w[1].datetime <= w[0].datetime)
        {
            return Err(ValidationError::InvalidInput(format!(
                "{} bars for {} are not strictly ascending at index {}",
                self.timeframe,
                self.symbol,
                pos + 1
            )));
        }

        for bar in bars {
            self.push(bar);
        }

        self.snapshot()
    }

    fn push(&mut self, bar: &PriceBar) {
        self.moving_average.next(bar.close);
        self.macd.next(bar.close);

        let typical_price = (bar.high + bar.low + bar.close) / 3.0;
        self.cumulative_tp_vol += typical_price * bar.volume;
        self.cumulative_vol += bar.volume;

        self.bars_seen += 1;
        self.last_bar = Some(bar.clone());
    }

    fn snapshot(&self) -> ValidatorResult<IndicatorSnapshot> {
        let insufficient = || ValidationError::InsufficientData {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            required: self.required_bars(),
            actual: self.bars_seen,
        };

        let last = self.last_bar.as_ref().ok_or_else(insufficient)?;
        let moving_average = self.moving_average.value().ok_or_else(insufficient)?;
        let macd = self.macd.value().ok_or_else(insufficient)?;

        let vwap = if self.cumulative_vol > 0.0 {
            self.cumulative_tp_vol / self.cumulative_vol
        } else {
            last.close
        };

        Ok(IndicatorSnapshot {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            price: last.close,
            moving_average,
            macd_line: macd.line,
            signal_line: macd.signal,
            histogram: macd.histogram(),
            vwap,
            momentum_positive: macd.line > 0.0,
            price_above_ma: last.close > moving_average,
            bars_used: self.bars_seen,
            timestamp: last.datetime,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
