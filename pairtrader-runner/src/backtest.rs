//! Offline evaluation of the decision rules over historical candles.
//!
//! Each candle drives one full cycle with the candle's own timestamp as
//! `now`, so staleness and forecast selection behave as they would have
//! live. Orders fill on a paper account at the candle close and land in an
//! in-memory ledger; nothing on disk is touched except an optional export of
//! the round trips.
//!
//! A round trip is a conversion out of the starting asset and back. It is
//! favorable when it ends with more of the starting asset than the run began
//! with.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use pairtrader_core::domain::{Pair, Side, Trade};
use pairtrader_core::ledger::MemoryLedger;
use pairtrader_core::provider::{Candle, PaperBalances, PaperExchange, PriceSource, ProviderError};

use crate::bot::{build_forecast, seed_ledger, Holding, SeedError};
use crate::config::{BotConfig, ConfigError};
use crate::cycle::{Collaborators, CycleError, CycleMode, Trader};

/// Why a backtest could not run or export.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no usable candles to replay")]
    NoCandles,

    #[error("starting position: {0}")]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("writing {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Starting position for a backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    pub holding: Holding,
    /// In units of the held asset.
    pub amount: f64,
}

/// Conversion out of the starting asset and back into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub opened: Trade,
    pub closed: Trade,
    /// Starting asset given up when the trip opened.
    pub amount_in: f64,
    /// Starting asset held again when it closed.
    pub amount_out: f64,
    pub favorable: bool,
}

impl RoundTrip {
    /// Relative change from `amount_in` to `amount_out`.
    pub fn gain(&self) -> f64 {
        self.amount_out / self.amount_in - 1.0
    }
}

/// Outcome of replaying a candle history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub candles: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub settings: BacktestSettings,
    pub fills: Vec<Trade>,
    pub round_trips: Vec<RoundTrip>,
    pub final_balances: PaperBalances,
    pub final_price: f64,
}

impl BacktestReport {
    /// Round trips that ended above the starting amount.
    pub fn favorable(&self) -> impl Iterator<Item = &RoundTrip> {
        self.round_trips.iter().filter(|t| t.favorable)
    }

    /// Final holdings marked to the last close, in the starting asset.
    pub fn final_value(&self) -> f64 {
        let b = self.final_balances;
        match self.settings.holding {
            Holding::Quote => b.quote + b.base * self.final_price,
            Holding::Base => b.base + b.quote / self.final_price,
        }
    }

    /// Relative change of [`final_value`](Self::final_value) over the
    /// starting amount.
    pub fn growth(&self) -> f64 {
        self.final_value() / self.settings.amount - 1.0
    }
}

/// Price source the backtest moves candle by candle.
struct CandleClose(Mutex<f64>);

impl CandleClose {
    fn set(&self, close: f64) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = close;
    }
}

impl PriceSource for CandleClose {
    fn last_price(&self, _pair: &Pair) -> Result<f64, ProviderError> {
        Ok(*self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Replay `candles` through the configured decision rules.
///
/// The starting position is recorded at the earliest candle's close; every
/// later candle runs one executing cycle.
pub fn run_backtest(
    config: &BotConfig,
    candles: &[Candle],
    settings: BacktestSettings,
) -> Result<BacktestReport, BacktestError> {
    let decision = config.to_decision_config()?;

    let mut candles = candles.to_vec();
    candles.sort_by_key(|c| c.timestamp);
    let (first, rest) = candles.split_first().ok_or(BacktestError::NoCandles)?;

    let ledger = Arc::new(MemoryLedger::new());
    let seed = seed_ledger(ledger.as_ref(), settings.holding, settings.amount, first.close, first.timestamp)?;

    let close = Arc::new(CandleClose(Mutex::new(first.close)));
    let exchange = Arc::new(PaperExchange::new(
        close.clone(),
        PaperBalances::from_anchor(&seed),
        config.exchange.slippage_bps,
        decision.fee_rate,
    ));
    let trader = Trader::new(
        decision,
        Collaborators {
            snapshot: exchange.clone(),
            forecast: build_forecast(config),
            execution: exchange.clone(),
            ledger,
        },
        config.schedule.call_timeout(),
    );

    let mut fills = Vec::new();
    for candle in rest {
        close.set(candle.close);
        exchange.set_time(candle.timestamp);
        let report = trader.run_cycle(candle.timestamp, CycleMode::Execute)?;
        if let Some(trade) = report.execution.filled_trade() {
            fills.push(trade.clone());
        }
    }

    let round_trips = round_trips(&fills, settings);
    let last = rest.last().unwrap_or(first);
    let report = BacktestReport {
        candles: candles.len(),
        first: first.timestamp,
        last: last.timestamp,
        settings,
        round_trips,
        fills,
        final_balances: exchange.balances(),
        final_price: last.close,
    };
    info!(
        candles = report.candles,
        fills = report.fills.len(),
        round_trips = report.round_trips.len(),
        favorable = report.favorable().count(),
        growth = report.growth(),
        "backtest finished"
    );
    Ok(report)
}

/// Pair each fill out of the starting asset with the next fill back into it.
pub fn round_trips(fills: &[Trade], settings: BacktestSettings) -> Vec<RoundTrip> {
    let (open_side, amount_of) = match settings.holding {
        Holding::Quote => (Side::Buy, (|t: &Trade| t.quote_amount) as fn(&Trade) -> f64),
        Holding::Base => (Side::Sell, (|t: &Trade| t.base_amount) as fn(&Trade) -> f64),
    };

    let mut trips = Vec::new();
    let mut open: Option<&Trade> = None;
    for fill in fills.iter().filter(|t| t.is_filled()) {
        if fill.side == open_side {
            open = Some(fill);
        } else if let Some(opened) = open.take() {
            let amount_out = amount_of(fill);
            trips.push(RoundTrip {
                opened: opened.clone(),
                closed: fill.clone(),
                amount_in: amount_of(opened),
                amount_out,
                favorable: amount_out > settings.amount,
            });
        }
    }
    trips
}

#[derive(Serialize)]
struct RoundTripRow {
    opened_at: DateTime<Utc>,
    open_price: f64,
    closed_at: DateTime<Utc>,
    close_price: f64,
    amount_in: f64,
    amount_out: f64,
    gain: f64,
}

/// Write round trips as CSV, one row per trip.
pub fn export_round_trips<'a>(
    path: &Path,
    trips: impl IntoIterator<Item = &'a RoundTrip>,
) -> Result<(), BacktestError> {
    let export_err = |source: csv::Error| BacktestError::Export {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(export_err)?;
    for trip in trips {
        writer
            .serialize(RoundTripRow {
                opened_at: trip.opened.timestamp,
                open_price: trip.opened.average_price,
                closed_at: trip.closed.timestamp,
                close_price: trip.closed.average_price,
                amount_in: trip.amount_in,
                amount_out: trip.amount_out,
                gain: trip.gain(),
            })
            .map_err(export_err)?;
    }
    writer.flush().map_err(|e| export_err(e.into()))?;
    Ok(())
}
