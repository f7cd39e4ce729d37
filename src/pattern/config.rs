//! Flagpole / consolidation / breakout detector configuration
//!
//! Defaults are tuned for intraday bars (5m to 15m).

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidatorResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    // === Flagpole ===
    /// Minimum move from pole low to close, as a fraction (default: 0.03)
    pub flagpole_min_move_pct: f64,
    /// Maximum bars the pole may span (default: 8)
    pub flagpole_max_bars: usize,
    /// Bars before the pole used as the volume reference (default: 20)
    pub volume_lookback: usize,
    /// Pole volume must exceed reference volume by this multiple (default: 1.5)
    pub flagpole_volume_multiplier: f64,

    // === Consolidation ===
    /// Maximum retracement of the pole magnitude (default: 0.5)
    pub max_retracement: f64,
    /// Bars of consolidation required before a breakout counts (default: 3)
    pub min_consolidation_bars: usize,
    /// Consolidation bars allowed before the setup expires (default: 20)
    pub max_consolidation_bars: usize,

    // === Breakout ===
    /// Fast-timeframe bars required for the breakout indicator check (default: 35)
    pub min_indicator_bars: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        PatternConfig {
            flagpole_min_move_pct: 0.03,
            flagpole_max_bars: 8,
            volume_lookback: 20,
            flagpole_volume_multiplier: 1.5,

            max_retracement: 0.5,
            min_consolidation_bars: 3,
            max_consolidation_bars: 20,

            min_indicator_bars: 35,
        }
    }
}

impl PatternConfig {
    pub fn validate(&self) -> ValidatorResult<()> {
        if self.flagpole_min_move_pct.is_nan() || self.flagpole_min_move_pct <= 0.0 {
            return Err(ValidationError::InvalidConfig(
                "flagpole_min_move_pct must be positive".into(),
            ));
        }
        if self.flagpole_max_bars < 2 {
            return Err(ValidationError::InvalidConfig(
                "flagpole_max_bars must be at least 2".into(),
            ));
        }
        if self.volume_lookback == 0 {
            return Err(ValidationError::InvalidConfig(
                "volume_lookback must be at least 1".into(),
            ));
        }
        let retracement = self.max_retracement;
        if retracement.is_nan() || retracement <= 0.0 || retracement > 1.0 {
            return Err(ValidationError::InvalidConfig(
                "max_retracement must be in (0, 1]".into(),
            ));
        }
        if self.min_consolidation_bars > self.max_consolidation_bars {
            return Err(ValidationError::InvalidConfig(
                "min_consolidation_bars must not exceed max_consolidation_bars".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PatternConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_consolidation_bounds() {
        let config = PatternConfig {
            min_consolidation_bars: 10,
            max_consolidation_bars: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_nan_and_out_of_range_thresholds() {
        for pct in [f64::NAN, 0.0, -0.01] {
            let config = PatternConfig {
                flagpole_min_move_pct: pct,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "flagpole_min_move_pct {}", pct);
        }
        for retracement in [f64::NAN, 0.0, 1.5] {
            let config = PatternConfig {
                max_retracement: retracement,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "max_retracement {}", retracement);
        }
        let config = PatternConfig {
            max_retracement: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PatternConfig =
            serde_json::from_str(r#"{ "flagpole_min_move_pct": 0.05 }"#).unwrap();
        assert_eq!(config.flagpole_min_move_pct, 0.05);
        assert_eq!(config.max_consolidation_bars, 20);
    }
}
