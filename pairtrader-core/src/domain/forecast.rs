//! Forecast price band for the next period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a forecast band cannot be used.
#[derive(Debug, Clone, Copy, Error, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandError {
    #[error("forecast band is inverted (low {low} > high {high})")]
    Inverted { low: f64, high: f64 },
    #[error("forecast band contains a non-finite value")]
    NonFinite,
}

/// Predicted low/high band produced by the out-of-core regression step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub timestamp: DateTime<Utc>,
    pub low_pred: f64,
    pub high_pred: f64,
}

impl Forecast {
    /// Check the band before the engine relies on it.
    pub fn validate(&self) -> Result<(), BandError> {
        if !self.low_pred.is_finite() || !self.high_pred.is_finite() {
            return Err(BandError::NonFinite);
        }
        if self.low_pred > self.high_pred {
            return Err(BandError::Inverted {
                low: self.low_pred,
                high: self.high_pred,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(low: f64, high: f64) -> Forecast {
        Forecast {
            timestamp: Utc::now(),
            low_pred: low,
            high_pred: high,
        }
    }

    #[test]
    fn ordered_band_is_valid() {
        assert!(band(0.04, 0.05).validate().is_ok());
        assert!(band(0.05, 0.05).validate().is_ok());
    }

    #[test]
    fn inverted_band_is_rejected() {
        assert_eq!(
            band(0.06, 0.05).validate(),
            Err(BandError::Inverted { low: 0.06, high: 0.05 })
        );
    }

    #[test]
    fn nan_is_rejected() {
        assert_eq!(band(f64::NAN, 0.05).validate(), Err(BandError::NonFinite));
    }
}
