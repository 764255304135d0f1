//! Collaborator interfaces and their backends.
//!
//! The decision engine never talks to an exchange. The cycle asks a
//! [`SnapshotProvider`] for price and balances, a [`ForecastProvider`] for the
//! predicted band, and hands any resulting order to an [`ExecutionAdapter`].
//! Backends are chosen at construction time; each gets its settings passed
//! in explicitly.

pub mod circuit_breaker;
pub mod forecast_file;
pub mod http_ticker;
pub mod paper;
pub mod replay;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Forecast, MarketSnapshot, Pair, Side, Trade};

pub use circuit_breaker::CircuitBreaker;
pub use forecast_file::{ForecastFile, ForecastFileError};
pub use http_ticker::{ExchangeSettings, HttpTicker};
pub use paper::{PaperBalances, PaperExchange};
pub use replay::{load_candles, Candle, ReplayPrices};

/// Failures reported by collaborators.
///
/// Everything except [`ProviderError::Rejected`] is transient: the cycle
/// holds and the scheduler tries again later.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit breaker open for another {0:?}")]
    CircuitOpen(Duration),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("order rejected: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Worth retrying on a later cycle.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::Rejected(_))
    }
}

/// Source of the latest traded price for a pair.
pub trait PriceSource: Send + Sync {
    fn last_price(&self, pair: &Pair) -> Result<f64, ProviderError>;
}

/// Current price and free balances.
pub trait SnapshotProvider: Send + Sync {
    fn name(&self) -> &str;

    fn snapshot(&self, pair: &Pair) -> Result<MarketSnapshot, ProviderError>;
}

/// Predicted price band for the next period. `Ok(None)` means no forecast is
/// available, which is a normal answer.
pub trait ForecastProvider: Send + Sync {
    fn forecast(&self, pair: &Pair, now: DateTime<Utc>) -> Result<Option<Forecast>, ProviderError>;
}

/// Submits market orders and reports the fill.
pub trait ExecutionAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn submit_market_order(
        &self,
        pair: &Pair,
        side: Side,
        base_amount: f64,
    ) -> Result<Trade, ProviderError>;
}

/// Forecast provider that never has a forecast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoForecast;

impl ForecastProvider for NoForecast {
    fn forecast(&self, _pair: &Pair, _now: DateTime<Utc>) -> Result<Option<Forecast>, ProviderError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejection_is_permanent() {
        assert!(ProviderError::Unavailable("dns".into()).is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(3)).is_transient());
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_transient());
        assert!(!ProviderError::Rejected("min notional".into()).is_transient());
    }
}
