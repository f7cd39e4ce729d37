//! CLI subcommands and the pipeline they share

pub mod scan;
pub mod validate;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use mtf_signal_validator::binance::BinanceDataSource;
use mtf_signal_validator::config::DataSourceKind;
use mtf_signal_validator::data::{CsvDataSource, MarketDataSource};
use mtf_signal_validator::{
    pattern, Config, PatternSignal, Symbol, Timeframe, TimeframeValidator, ValidationLogger,
    ValidationResult,
};

/// Result of running one symbol through detection and validation
pub enum SymbolOutcome {
    /// No breakout on the newest fast bar and validation not forced
    NoPattern { bars: usize },
    Validated {
        signal: Option<PatternSignal>,
        result: ValidationResult,
    },
}

pub fn load_config(config_path: &str, source_override: Option<String>) -> Result<Config> {
    let mut config = Config::from_file(config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(source) = source_override {
        config.data.source = source
            .parse::<DataSourceKind>()
            .map_err(anyhow::Error::msg)?;
        info!("Overriding data source to: {:?}", config.data.source);
    }

    Ok(config)
}

pub fn build_source(config: &Config) -> Result<Arc<dyn MarketDataSource>> {
    let source: Arc<dyn MarketDataSource> = match config.data.source {
        DataSourceKind::Csv => Arc::new(CsvDataSource::new(&config.data.data_dir)),
        DataSourceKind::Binance => Arc::new(BinanceDataSource::new()?),
    };
    debug!("Using {} data source", source.name());
    Ok(source)
}

pub fn build_validator(
    config: &Config,
    source: Arc<dyn MarketDataSource>,
) -> Result<TimeframeValidator> {
    let records_dir = config.logging.records_dir();
    info!("Validation records: {}", records_dir.display());

    let logger = Arc::new(ValidationLogger::new(records_dir));
    let validator = TimeframeValidator::new(config.validation.clone(), source, logger)
        .context("Invalid validation configuration")?
        .with_latency_budget(config.latency.clone());
    Ok(validator)
}

/// Fetch fast bars, look for a breakout, and validate it
pub async fn evaluate_symbol(
    config: &Config,
    source: &dyn MarketDataSource,
    validator: &TimeframeValidator,
    symbol: &Symbol,
    force: bool,
) -> Result<SymbolOutcome> {
    let settings = config
        .validation
        .settings(Timeframe::Fast)
        .context("No settings for fast timeframe")?;

    let fast_bars = source
        .get_bars(symbol, Timeframe::Fast, &settings.interval, settings.lookback)
        .await
        .context(format!("Failed to fetch {} bars for {}", settings.interval, symbol))?;

    let signal = pattern::latest_breakout(symbol, &config.pattern, &fast_bars);

    let price = match (&signal, fast_bars.last()) {
        (Some(signal), _) => signal.breakout_price,
        (None, Some(last)) if force => last.close,
        _ => {
            return Ok(SymbolOutcome::NoPattern {
                bars: fast_bars.len(),
            })
        }
    };

    if let Some(signal) = &signal {
        info!(
            "{}: breakout at {} (price {:.4}, quality {:.1})",
            symbol, signal.breakout_time, signal.breakout_price, signal.quality_score
        );
    }

    let result = validator.validate(symbol, price, &fast_bars).await?;
    Ok(SymbolOutcome::Validated { signal, result })
}

pub fn print_result(result: &ValidationResult) {
    println!("  Decision:        {}", result.status);
    println!("  Aggregate score: {}", result.aggregate_score);
    println!("  Passed:          {}", result.passed);
    for tf in Timeframe::HIGHER {
        match (result.score(tf), result.snapshots.get(&tf)) {
            (Some(score), Some(snap)) => println!(
                "  {:<7} score {} | close {:.4} ema {:.4} macd {:+.4}",
                tf.as_str(),
                score,
                snap.price,
                snap.moving_average,
                snap.macd_line
            ),
            _ if result.degraded_timeframes.contains(&tf) => {
                println!("  {:<7} unavailable", tf.as_str())
            }
            _ => {}
        }
    }
    if result.retries_attempted > 0 {
        println!("  Retries:         {}", result.retries_attempted);
    }
    for reason in &result.reasons {
        println!("    - {}", reason);
    }
}
