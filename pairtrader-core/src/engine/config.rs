//! Decision engine configuration.

use crate::domain::Pair;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which rule set the engine applies once it knows which asset is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Compare price against the anchor price and the forecast band, with a
    /// staleness escape valve near the forecast bound.
    #[default]
    ForecastBand,
    /// Act only when converting the full free balance yields more than the
    /// anchor amount plus `min_profit_rate`.
    MinProfit,
}

/// Out-of-range decision settings.
#[derive(Debug, Error, PartialEq)]
pub enum DecisionConfigError {
    #[error("fee_rate must be in [0, 1), got {0}")]
    FeeRate(f64),
    #[error("min_profit_rate must be >= 0, got {0}")]
    MinProfitRate(f64),
    #[error("proximity_tolerance must be in [0, 1), got {0}")]
    ProximityTolerance(f64),
    #[error("staleness_threshold must not be negative")]
    NegativeStaleness,
}

/// Immutable per-run configuration for [`decide`](super::decide).
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    pub pair: Pair,
    pub fee_rate: f64,
    pub min_profit_rate: f64,
    pub staleness_threshold: Duration,
    pub proximity_tolerance: f64,
    pub mode: DecisionMode,
}

impl DecisionConfig {
    /// Defaults for an hourly ETH/BTC bot: 0.1% fee, 0.5%
    /// minimum profit, one hour staleness, 10% proximity.
    pub fn with_defaults(pair: Pair) -> Self {
        Self {
            pair,
            fee_rate: 0.001,
            min_profit_rate: 0.005,
            staleness_threshold: Duration::minutes(60),
            proximity_tolerance: 0.1,
            mode: DecisionMode::ForecastBand,
        }
    }

    /// Check every rate and threshold is in range.
    pub fn validate(&self) -> Result<(), DecisionConfigError> {
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(DecisionConfigError::FeeRate(self.fee_rate));
        }
        if !(self.min_profit_rate >= 0.0 && self.min_profit_rate.is_finite()) {
            return Err(DecisionConfigError::MinProfitRate(self.min_profit_rate));
        }
        if !(0.0..1.0).contains(&self.proximity_tolerance) {
            return Err(DecisionConfigError::ProximityTolerance(self.proximity_tolerance));
        }
        if self.staleness_threshold < Duration::zero() {
            return Err(DecisionConfigError::NegativeStaleness);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DecisionConfig {
        DecisionConfig::with_defaults(Pair::new("ETH", "BTC").unwrap())
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let mut c = config();
        c.fee_rate = 1.0;
        assert_eq!(c.validate(), Err(DecisionConfigError::FeeRate(1.0)));

        let mut c = config();
        c.min_profit_rate = -0.1;
        assert_eq!(c.validate(), Err(DecisionConfigError::MinProfitRate(-0.1)));

        let mut c = config();
        c.proximity_tolerance = f64::NAN;
        assert!(matches!(c.validate(), Err(DecisionConfigError::ProximityTolerance(_))));
    }

    #[test]
    fn rejects_negative_staleness() {
        let mut c = config();
        c.staleness_threshold = Duration::seconds(-1);
        assert_eq!(c.validate(), Err(DecisionConfigError::NegativeStaleness));
    }
}
