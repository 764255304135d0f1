//! Price source that replays close prices from a candle CSV.
//!
//! Expects a `timestamp,open,high,low,close,volume` header, the layout the
//! history downloader writes. Each call returns the next close; once the
//! file is exhausted the source reports itself unavailable.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::forecast_file::parse_timestamp;
use super::{PriceSource, ProviderError};
use crate::domain::Pair;

#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp: String,
    close: f64,
}

/// Close of one historical candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// Read candles from a `timestamp,open,high,low,close,volume` CSV, in file
/// order. Rows with an unparseable timestamp or a non-positive close are
/// skipped.
pub fn load_candles(path: &Path) -> Result<Vec<Candle>, ProviderError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ProviderError::Unavailable(format!("{}: {e}", path.display())))?;

    let mut candles = Vec::new();
    for (line, row) in reader.deserialize::<CandleRow>().enumerate() {
        let line = line + 2;
        match row {
            Ok(c) if !(c.close.is_finite() && c.close > 0.0) => {
                warn!(path = %path.display(), line, close = c.close, "skipping candle with invalid close")
            }
            Ok(c) => match parse_timestamp(&c.timestamp) {
                Some(timestamp) => candles.push(Candle {
                    timestamp,
                    close: c.close,
                }),
                None => warn!(path = %path.display(), line, timestamp = %c.timestamp, "skipping candle with bad timestamp"),
            },
            Err(e) if e.is_io_error() => {
                return Err(ProviderError::Unavailable(format!("{}: {e}", path.display())))
            }
            Err(e) => warn!(path = %path.display(), line, error = %e, "skipping malformed candle row"),
        }
    }
    Ok(candles)
}

/// Price source handing out a fixed series of closes, one per call.
#[derive(Debug)]
pub struct ReplayPrices {
    closes: Vec<f64>,
    cursor: Mutex<usize>,
}

impl ReplayPrices {
    /// Replay the given closes in order.
    pub fn from_prices(closes: Vec<f64>) -> Self {
        Self {
            closes,
            cursor: Mutex::new(0),
        }
    }

    /// Replay the closes of a candle CSV; see [`load_candles`].
    pub fn from_csv(path: &Path) -> Result<Self, ProviderError> {
        let closes = load_candles(path)?.into_iter().map(|c| c.close).collect();
        Ok(Self::from_prices(closes))
    }

    /// Total number of prices, replayed or not.
    pub fn len(&self) -> usize {
        self.closes.len()
    }

    /// True when the series holds no prices.
    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Prices not yet handed out.
    pub fn remaining(&self) -> usize {
        let cursor = *self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        self.closes.len().saturating_sub(cursor)
    }
}

impl PriceSource for ReplayPrices {
    fn last_price(&self, _pair: &Pair) -> Result<f64, ProviderError> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let price = self
            .closes
            .get(*cursor)
            .copied()
            .ok_or_else(|| ProviderError::Unavailable("price replay exhausted".into()))?;
        *cursor += 1;
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replays_closes_in_order_then_runs_dry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("historial_ETH_BTC.csv");
        std::fs::write(
            &path,
            "timestamp,open,high,low,close,volume\n\
             2025-01-01 00:00:00,0.050,0.051,0.049,0.0505,120.5\n\
             2025-01-01 01:00:00,0.0505,0.052,0.050,0.0512,98.1\n\
             2025-01-01 02:00:00,0.0512,0.052,0.050,oops,98.1\n",
        )
        .unwrap();

        let pair: Pair = "ETH/BTC".parse().unwrap();
        let replay = ReplayPrices::from_csv(&path).unwrap();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.last_price(&pair).unwrap(), 0.0505);
        assert_eq!(replay.last_price(&pair).unwrap(), 0.0512);
        assert_eq!(replay.remaining(), 0);
        assert!(matches!(
            replay.last_price(&pair),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn candles_keep_their_timestamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("candles.csv");
        std::fs::write(
            &path,
            "timestamp,open,high,low,close,volume\n\
             2025-01-01T00:00:00Z,0.050,0.051,0.049,0.0505,120.5\n\
             yesterday,0.050,0.051,0.049,0.0507,1.0\n\
             2025-01-01 01:00:00,0.0505,0.052,0.050,0.0512,98.1\n",
        )
        .unwrap();

        let candles = load_candles(&path).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp.to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(candles[1].close, 0.0512);
        assert!(candles[0].timestamp < candles[1].timestamp);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        assert!(ReplayPrices::from_csv(&dir.path().join("nope.csv")).is_err());
    }
}
