//! Error types for the validation pipeline
//!
//! A `BLOCK` decision is not an error; these types only describe misuse,
//! missing data and upstream failures.

use thiserror::Error;

use crate::{Symbol, Timeframe};

/// Validation errors for individual OHLCV bars
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// Failure reported by a market data source
///
/// The validator retries both kinds; classification is kept for logging.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("transient fetch error: {0}")]
    Transient(String),

    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Errors surfaced by the indicator engine and the timeframe validator
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "insufficient data for {symbol} on {timeframe} timeframe: required {required} bars, got {actual}"
    )]
    InsufficientData {
        symbol: Symbol,
        timeframe: Timeframe,
        required: usize,
        actual: usize,
    },

    #[error("data fetch failed for {symbol} on {timeframe} timeframe after {attempts} attempts: {message}")]
    DataFetch {
        symbol: Symbol,
        timeframe: Timeframe,
        attempts: u32,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type ValidatorResult<T> = Result<T, ValidationError>;
