//! Multi-Timeframe Signal Validation
//!
//! Turns raw price bars into a single entry/block decision for a momentum
//! trade candidate:
//!
//! - **Pattern detection** on the fast timeframe: flagpole, consolidation,
//!   breakout, as an explicit state machine.
//! - **Indicator snapshots** (EMA, MACD, VWAP) from a fresh engine per
//!   timeframe and per call.
//! - **Timeframe validation**: weighted scoring of the daily and medium
//!   timeframes with retry, backoff and degraded fallback.
//! - **Validation records**: one JSON line per decision, partitioned by
//!   fast interval and day.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use mtf_signal_validator::config::ValidationConfig;
//! use mtf_signal_validator::data::CsvDataSource;
//! use mtf_signal_validator::validation_logger::ValidationLogger;
//! use mtf_signal_validator::{Symbol, TimeframeValidator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let validator = TimeframeValidator::new(
//!         ValidationConfig::default(),
//!         Arc::new(CsvDataSource::new("data")),
//!         Arc::new(ValidationLogger::new("logs/mtf_validation")),
//!     )?;
//!     let result = validator.validate(&Symbol::new("BTCUSDT"), 42_000.0, &[]).await?;
//!     println!("{} score={}", result.status, result.aggregate_score);
//!     Ok(())
//! }
//! ```

pub mod binance;
pub mod common;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod latency;
pub mod pattern;
pub mod types;
pub mod validation_logger;
pub mod validator;

pub use config::Config;
pub use error::{FetchError, ValidationError, ValidatorResult};
pub use indicators::{IndicatorEngine, IndicatorSnapshot};
pub use pattern::{PatternDetector, PatternPhase, PatternSignal, PatternState};
pub use types::*;
pub use validation_logger::ValidationLogger;
pub use validator::{TimeframeValidator, ValidationResult, ValidationStatus};
