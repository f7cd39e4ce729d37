//! Binance public klines as a market data source
//!
//! No API key required for public market data endpoints.
//!
//! # Example
//! ```no_run
//! use mtf_signal_validator::binance::BinanceDataSource;
//! use mtf_signal_validator::data::MarketDataSource;
//! use mtf_signal_validator::{Symbol, Timeframe};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = BinanceDataSource::new()?;
//!     let bars = source
//!         .get_bars(&Symbol::new("BTCUSDT"), Timeframe::Daily, "1d", 100)
//!         .await?;
//!     println!("Fetched {} bars", bars.len());
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use std::time::Duration as StdDuration;
use tracing::debug;

use crate::data::MarketDataSource;
use crate::error::FetchError;
use crate::{PriceBar, Symbol, Timeframe};

/// Base URL for Binance API
const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

/// Maximum klines per request (Binance limit)
const MAX_KLINES_PER_REQUEST: usize = 1000;

#[derive(Debug, Clone)]
pub struct BinanceDataSource {
    client: Client,
    base_url: String,
}

impl BinanceDataSource {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BINANCE_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(BinanceDataSource {
            client,
            base_url: base_url.into(),
        })
    }
}

/// Parse one kline row:
/// [open_time, open, high, low, close, volume, close_time, ...]
pub fn parse_kline(raw: &[serde_json::Value]) -> Option<PriceBar> {
    if raw.len() < 6 {
        return None;
    }

    let num = |v: &serde_json::Value| -> Option<f64> { v.as_str()?.parse().ok() };

    PriceBar::new(
        DateTime::from_timestamp_millis(raw[0].as_i64()?)?,
        num(&raw[1])?,
        num(&raw[2])?,
        num(&raw[3])?,
        num(&raw[4])?,
        num(&raw[5])?,
    )
    .ok()
}

fn classify_status(status: StatusCode, body: &str) -> FetchError {
    let message = format!("Binance API error {}: {}", status, body);
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        FetchError::Permanent(message)
    } else {
        FetchError::Transient(message)
    }
}

#[async_trait]
impl MarketDataSource for BinanceDataSource {
    async fn get_bars(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<PriceBar>, FetchError> {
        let url = format!("{}/klines", self.base_url);
        let limit = lookback.clamp(1, MAX_KLINES_PER_REQUEST);

        debug!(
            "Fetching klines: symbol={}, timeframe={}, interval={}, limit={}",
            symbol, timeframe, interval, limit
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.as_str().to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let raw_data: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("invalid klines payload: {}", e)))?;

        let mut bars: Vec<PriceBar> = raw_data.iter().filter_map(|row| parse_kline(row)).collect();
        bars.sort_by_key(|b| b.datetime);
        bars.dedup_by_key(|b| b.datetime);

        Ok(bars)
    }

    fn name(&self) -> &str {
        "binance"
    }
}
