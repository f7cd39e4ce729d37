//! Core data types used across the validation pipeline

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

use crate::error::BarValidationError;

/// OHLCV price bar for one period of a timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Create a new bar with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(datetime, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (trusted sources, tests)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Trading symbol using Arc<str> for cheap cloning across tasks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a timeframe in the validation pipeline
///
/// `Fast` is the pattern-confirmation timeframe; `Medium` and `Daily` are
/// the higher timeframes the validator scores against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Fast,
    Medium,
    Daily,
}

impl Timeframe {
    /// Higher timeframes fetched by the validator, in fetch order
    pub const HIGHER: [Timeframe; 2] = [Timeframe::Daily, Timeframe::Medium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Fast => "fast",
            Timeframe::Medium => "medium",
            Timeframe::Daily => "daily",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Timeframe::Fast),
            "medium" => Ok(Timeframe::Medium),
            "daily" => Ok(Timeframe::Daily),
            other => Err(format!("unknown timeframe: {}", other)),
        }
    }
}

/// Fixed-point score in [0.0, 1.0]
///
/// Weights and scores are combined in decimal arithmetic so that threshold
/// comparisons (e.g. an aggregate of exactly 0.5) are deterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(#[serde(with = "rust_decimal::serde::float")] Decimal);

impl Score {
    pub const ZERO: Score = Score(Decimal::ZERO);
    pub const ONE: Score = Score(Decimal::ONE);

    /// Decimal places kept after every arithmetic step
    pub const SCALE: u32 = 4;

    /// Build from a decimal, clamped to [0, 1] and rounded to `SCALE` places
    pub fn new(value: Decimal) -> Self {
        Score(value.round_dp(Self::SCALE).clamp(Decimal::ZERO, Decimal::ONE))
    }

    pub fn half() -> Self {
        Score(Decimal::new(5, 1))
    }

    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Score::ZERO;
        }
        Self::new(Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO))
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }
}

impl Add for Score {
    type Output = Score;

    fn add(self, rhs: Score) -> Score {
        Score::new(self.0 + rhs.0)
    }
}

impl Mul<Decimal> for Score {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        self.0 * rhs
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
