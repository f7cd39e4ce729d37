//! Pattern detector state machine
//!
//! ## Transitions
//! 1. SearchingFlagpole: rapid move above `flagpole_min_move_pct` within
//!    `flagpole_max_bars`, on volume above the pre-pole reference
//! 2. FlagpoleConfirmed: moves straight on to Consolidating
//! 3. Consolidating: bounded retracement, contracting volume, bar limit
//! 4. BreakoutConfirmed: close above the range on expanding volume with
//!    fast-timeframe momentum and price above its moving average

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::indicators::{mean, sma, IndicatorEngine, IndicatorSnapshot};
use crate::{PriceBar, Symbol, Timeframe};

use super::config::PatternConfig;
use super::{
    Consolidation, FailureReason, Flagpole, PatternPhase, PatternSignal, PatternState,
};

/// Detector for a single candidate setup on the fast timeframe
#[derive(Debug, Clone)]
pub struct PatternDetector {
    symbol: Symbol,
    config: PatternConfig,
    state: PatternState,
    transitions: Vec<PatternPhase>,
    last_processed: Option<DateTime<Utc>>,
}

impl PatternDetector {
    pub fn new(symbol: Symbol, config: PatternConfig) -> Self {
        PatternDetector {
            symbol,
            config,
            state: PatternState::SearchingFlagpole,
            transitions: vec![PatternPhase::SearchingFlagpole],
            last_processed: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> &PatternState {
        &self.state
    }

    pub fn phase(&self) -> PatternPhase {
        self.state.phase()
    }

    /// Ordered history of phases entered, starting with SearchingFlagpole
    pub fn transitions(&self) -> &[PatternPhase] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn signal(&self) -> Option<&PatternSignal> {
        match &self.state {
            PatternState::BreakoutConfirmed(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn into_signal(self) -> Option<PatternSignal> {
        match self.state {
            PatternState::BreakoutConfirmed(signal) => Some(*signal),
            _ => None,
        }
    }

    /// Evaluate the newest bar of `bars`; earlier bars are context
    ///
    /// Bars not newer than the last evaluated bar are ignored, as is any
    /// input once the detector is terminal.
    pub fn on_bar(&mut self, bars: &[PriceBar]) -> PatternPhase {
        let Some(bar) = bars.last() else {
            return self.phase();
        };

        if self.is_terminal() {
            return self.phase();
        }

        if matches!(self.last_processed, Some(last) if bar.datetime <= last) {
            return self.phase();
        }
        self.last_processed = Some(bar.datetime);

        let state = std::mem::replace(&mut self.state, PatternState::SearchingFlagpole);
        let next = match self.step(state, bars) {
            PatternState::FlagpoleConfirmed(flagpole) => {
                self.record(PatternPhase::FlagpoleConfirmed);
                PatternState::Consolidating {
                    flagpole,
                    consolidation: Consolidation::new(),
                }
            }
            other => other,
        };

        self.state = next;
        self.record(self.state.phase());
        self.phase()
    }

    fn record(&mut self, phase: PatternPhase) {
        if self.transitions.last() != Some(&phase) {
            self.transitions.push(phase);
        }
    }

    fn step(&self, state: PatternState, bars: &[PriceBar]) -> PatternState {
        match state {
            PatternState::SearchingFlagpole => match self.find_flagpole(bars) {
                Some(flagpole) => {
                    info!(
                        symbol = %self.symbol,
                        low = flagpole.low,
                        high = flagpole.high,
                        move_pct = flagpole.move_pct() * 100.0,
                        "Flagpole confirmed"
                    );
                    PatternState::FlagpoleConfirmed(flagpole)
                }
                None => PatternState::SearchingFlagpole,
            },
            PatternState::FlagpoleConfirmed(flagpole) => PatternState::Consolidating {
                flagpole,
                consolidation: Consolidation::new(),
            },
            PatternState::Consolidating {
                flagpole,
                consolidation,
            } => self.consolidate(flagpole, consolidation, bars),
            terminal => terminal,
        }
    }

    fn find_flagpole(&self, bars: &[PriceBar]) -> Option<Flagpole> {
        let cfg = &self.config;
        let n = bars.len();
        if n < cfg.volume_lookback + 2 {
            return None;
        }

        let current = &bars[n - 1];
        // Pole must leave a full volume reference window before it
        let window_start = n.saturating_sub(cfg.flagpole_max_bars).max(cfg.volume_lookback);
        let (low_offset, low_bar) = bars[window_start..n]
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.low.partial_cmp(&b.1.low).unwrap_or(Ordering::Equal))?;

        let pole_start = window_start + low_offset;
        if pole_start >= n - 1 || low_bar.low <= 0.0 {
            return None;
        }

        let move_pct = (current.close - low_bar.low) / low_bar.low;
        if move_pct < cfg.flagpole_min_move_pct {
            return None;
        }

        let pole_bars = &bars[pole_start..n];
        let pole_volumes: Vec<f64> = pole_bars.iter().map(|b| b.volume).collect();
        let reference_volumes: Vec<f64> = bars[pole_start - cfg.volume_lookback..pole_start]
            .iter()
            .map(|b| b.volume)
            .collect();

        let avg_volume = mean(&pole_volumes)?;
        let reference_volume = sma(&reference_volumes, cfg.volume_lookback)
            .last()
            .copied()
            .flatten()?;

        if avg_volume <= reference_volume * cfg.flagpole_volume_multiplier {
            debug!(
                symbol = %self.symbol,
                avg_volume,
                reference_volume,
                "Price move without volume expansion, not a flagpole"
            );
            return None;
        }

        let high = pole_bars
            .iter()
            .map(|b| b.high)
            .fold(f64::MIN, f64::max);

        Some(Flagpole {
            start: low_bar.datetime,
            end: current.datetime,
            low: low_bar.low,
            high,
            bars: pole_bars.len(),
            avg_volume,
            reference_volume,
        })
    }

    fn consolidate(
        &self,
        mut flagpole: Flagpole,
        mut consolidation: Consolidation,
        bars: &[PriceBar],
    ) -> PatternState {
        let cfg = &self.config;
        let Some(bar) = bars.last() else {
            return PatternState::Consolidating {
                flagpole,
                consolidation,
            };
        };

        // Pole still running: extend it instead of starting the range
        if consolidation.bars == 0 && bar.close > flagpole.high {
            let total_volume = flagpole.avg_volume * flagpole.bars as f64 + bar.volume;
            flagpole.bars += 1;
            flagpole.avg_volume = total_volume / flagpole.bars as f64;
            flagpole.high = flagpole.high.max(bar.high);
            flagpole.end = bar.datetime;
            debug!(symbol = %self.symbol, high = flagpole.high, "Flagpole extended");
            return PatternState::Consolidating {
                flagpole,
                consolidation,
            };
        }

        let retracement = (flagpole.high - bar.low) / flagpole.magnitude();
        if retracement > cfg.max_retracement {
            return self.fail(FailureReason::RetracementExceeded);
        }

        if consolidation.bars >= cfg.min_consolidation_bars
            && bar.close > consolidation.high
            && bar.volume > consolidation.avg_volume()
        {
            match self.fast_snapshot(bars) {
                Some(snapshot) if snapshot.momentum_positive && snapshot.price_above_ma => {
                    let quality_score = quality_score(cfg, &flagpole, &consolidation, &snapshot);
                    info!(
                        symbol = %self.symbol,
                        price = bar.close,
                        quality_score,
                        "Breakout confirmed"
                    );
                    return PatternState::BreakoutConfirmed(Box::new(PatternSignal {
                        symbol: self.symbol.clone(),
                        flagpole,
                        consolidation,
                        breakout_price: bar.close,
                        breakout_volume: bar.volume,
                        breakout_time: bar.datetime,
                        quality_score,
                        snapshot,
                    }));
                }
                _ => debug!(
                    symbol = %self.symbol,
                    price = bar.close,
                    "Breakout candidate without indicator alignment"
                ),
            }
        }

        consolidation.absorb(bar.high, bar.low, bar.volume);

        if consolidation.bars >= cfg.min_consolidation_bars
            && consolidation.avg_volume() >= flagpole.avg_volume
        {
            return self.fail(FailureReason::VolumeNotContracting);
        }

        if consolidation.bars > cfg.max_consolidation_bars {
            return self.fail(FailureReason::ConsolidationTimeout);
        }

        PatternState::Consolidating {
            flagpole,
            consolidation,
        }
    }

    /// Fresh engine per check; the detector never holds indicator state
    fn fast_snapshot(&self, bars: &[PriceBar]) -> Option<IndicatorSnapshot> {
        IndicatorEngine::new(
            self.symbol.clone(),
            Timeframe::Fast,
            self.config.min_indicator_bars,
        )
        .update(bars)
        .map_err(|e| debug!(symbol = %self.symbol, "Fast indicators unavailable: {}", e))
        .ok()
    }

    fn fail(&self, reason: FailureReason) -> PatternState {
        debug!(symbol = %self.symbol, %reason, "Pattern failed");
        PatternState::Failed(reason)
    }
}

/// Quality in [0, 100]: flagpole strength (40), tightness (30), alignment (30)
fn quality_score(
    config: &PatternConfig,
    flagpole: &Flagpole,
    consolidation: &Consolidation,
    snapshot: &IndicatorSnapshot,
) -> f64 {
    let strength = (flagpole.move_pct() / (2.0 * config.flagpole_min_move_pct)).min(1.0) * 40.0;

    let retracement = ((flagpole.high - consolidation.low) / flagpole.magnitude()).max(0.0);
    let tightness = (1.0 - retracement / config.max_retracement).clamp(0.0, 1.0) * 30.0;

    let mut alignment = 0.0;
    if snapshot.momentum_positive && snapshot.price_above_ma {
        alignment += 20.0;
    }
    if snapshot.histogram.is_some_and(|h| h > 0.0) {
        alignment += 10.0;
    }

    (strength + tightness + alignment).clamp(0.0, 100.0)
}

/// Replay a bar sequence and collect every confirmed breakout
///
/// A failed or completed detector is replaced by a new one on the next bar.
pub fn scan(symbol: &Symbol, config: &PatternConfig, bars: &[PriceBar]) -> Vec<PatternSignal> {
    let mut signals = Vec::new();
    let mut detector = PatternDetector::new(symbol.clone(), config.clone());

    for end in 1..=bars.len() {
        match detector.on_bar(&bars[..end]) {
            PatternPhase::BreakoutConfirmed => {
                let finished = std::mem::replace(
                    &mut detector,
                    PatternDetector::new(symbol.clone(), config.clone()),
                );
                signals.extend(finished.into_signal());
            }
            PatternPhase::Failed => {
                detector = PatternDetector::new(symbol.clone(), config.clone());
            }
            _ => {}
        }
    }

    signals
}

/// The breakout confirmed on the newest bar, if any
///
/// Breakouts completed on earlier bars are stale and yield `None`.
pub fn latest_breakout(
    symbol: &Symbol,
    config: &PatternConfig,
    bars: &[PriceBar],
) -> Option<PatternSignal> {
    let newest = bars.last()?.datetime;
    scan(symbol, config, bars)
        .pop()
        .filter(|signal| signal.breakout_time == newest)
}
