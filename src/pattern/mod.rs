//! Flagpole -> consolidation -> breakout pattern detection
//!
//! Runs on the fast (confirmation) timeframe. A detector tracks exactly one
//! candidate setup through an explicit state machine:
//!
//! ```text
//! SearchingFlagpole -> FlagpoleConfirmed -> Consolidating -> BreakoutConfirmed
//!                                                         \-> Failed
//! ```
//!
//! `Failed` is an ordinary outcome ("no pattern"); the caller starts a new
//! detector for later bars.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod detector;

pub use config::PatternConfig;
pub use detector::{latest_breakout, scan, PatternDetector};

use crate::indicators::IndicatorSnapshot;
use crate::Symbol;

/// Phase of a candidate setup, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternPhase {
    SearchingFlagpole,
    FlagpoleConfirmed,
    Consolidating,
    BreakoutConfirmed,
    Failed,
}

impl PatternPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PatternPhase::BreakoutConfirmed | PatternPhase::Failed)
    }
}

/// The sharp, high-volume move that starts a setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flagpole {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub low: f64,
    pub high: f64,
    pub bars: usize,
    pub avg_volume: f64,
    /// Volume reference taken before the pole started
    pub reference_volume: f64,
}

impl Flagpole {
    pub fn magnitude(&self) -> f64 {
        self.high - self.low
    }

    pub fn move_pct(&self) -> f64 {
        if self.low > 0.0 {
            self.magnitude() / self.low
        } else {
            0.0
        }
    }
}

/// Range built after the pole while price pauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consolidation {
    pub high: f64,
    pub low: f64,
    pub bars: usize,
    pub volume_sum: f64,
}

impl Consolidation {
    pub fn new() -> Self {
        Consolidation {
            high: f64::MIN,
            low: f64::MAX,
            bars: 0,
            volume_sum: 0.0,
        }
    }

    pub fn avg_volume(&self) -> f64 {
        if self.bars == 0 {
            0.0
        } else {
            self.volume_sum / self.bars as f64
        }
    }

    pub fn absorb(&mut self, high: f64, low: f64, volume: f64) {
        self.high = self.high.max(high);
        self.low = self.low.min(low);
        self.bars += 1;
        self.volume_sum += volume;
    }
}

impl Default for Consolidation {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a candidate setup ended without a breakout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RetracementExceeded,
    VolumeNotContracting,
    ConsolidationTimeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::RetracementExceeded => "retracement exceeded flagpole bound",
            FailureReason::VolumeNotContracting => "consolidation volume did not contract",
            FailureReason::ConsolidationTimeout => "no breakout within consolidation window",
        };
        f.write_str(s)
    }
}

/// A confirmed setup, ready for multi-timeframe validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub symbol: Symbol,
    pub flagpole: Flagpole,
    pub consolidation: Consolidation,
    pub breakout_price: f64,
    pub breakout_volume: f64,
    pub breakout_time: DateTime<Utc>,
    /// Quality in [0, 100]
    pub quality_score: f64,
    pub snapshot: IndicatorSnapshot,
}

/// State machine for one candidate setup
#[derive(Debug, Clone, PartialEq)]
pub enum PatternState {
    SearchingFlagpole,
    FlagpoleConfirmed(Flagpole),
    Consolidating {
        flagpole: Flagpole,
        consolidation: Consolidation,
    },
    BreakoutConfirmed(Box<PatternSignal>),
    Failed(FailureReason),
}

impl PatternState {
    pub fn phase(&self) -> PatternPhase {
        match self {
            PatternState::SearchingFlagpole => PatternPhase::SearchingFlagpole,
            PatternState::FlagpoleConfirmed(_) => PatternPhase::FlagpoleConfirmed,
            PatternState::Consolidating { .. } => PatternPhase::Consolidating,
            PatternState::BreakoutConfirmed(_) => PatternPhase::BreakoutConfirmed,
            PatternState::Failed(_) => PatternPhase::Failed,
        }
    }
}
