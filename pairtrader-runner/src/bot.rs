//! Assemble a [`Trader`] from a [`BotConfig`], and bootstrap its ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use pairtrader_core::domain::Trade;
use pairtrader_core::ledger::{CsvLedger, LedgerError, TradeLedger};
use pairtrader_core::provider::{
    CircuitBreaker, ForecastFile, ForecastProvider, HttpTicker, NoForecast, PaperBalances,
    PaperExchange, PriceSource, ProviderError, ReplayPrices,
};

use crate::audit::DecisionLog;
use crate::config::{BotConfig, ConfigError, PriceSourceKind};
use crate::cycle::{Collaborators, Trader};

/// Why a trader could not be assembled from its config.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("price source: {0}")]
    PriceSource(#[from] ProviderError),

    #[error("reading ledger anchor: {0}")]
    Ledger(#[from] LedgerError),
}

/// HTTP ticker or candle replay, as configured.
pub fn build_price_source(config: &BotConfig) -> Result<Arc<dyn PriceSource>, BuildError> {
    Ok(match config.exchange.price_source {
        PriceSourceKind::Http => Arc::new(HttpTicker::new(
            config.exchange_settings(),
            Arc::new(CircuitBreaker::default_exchange()),
        )?),
        PriceSourceKind::Replay => {
            let path = config
                .exchange
                .replay_file
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("exchange.replay_file is required for replay".into()))?;
            let replay = ReplayPrices::from_csv(path)?;
            info!(path = %path.display(), prices = replay.len(), "loaded price replay");
            Arc::new(replay)
        }
    })
}

/// The configured forecast file, or no forecast at all.
pub fn build_forecast(config: &BotConfig) -> Arc<dyn ForecastProvider> {
    match &config.paths.forecast {
        Some(path) => Arc::new(ForecastFile::new(path)),
        None => Arc::new(NoForecast),
    }
}

/// Paper exchange, CSV ledger, optional forecast file and decision log.
///
/// The paper balances resume from the ledger anchor when there is one, so a
/// restarted bot holds what its last fill left it. The configured
/// `paper_base`/`paper_quote` only apply to a ledger with no fills.
pub fn build_trader(config: &BotConfig) -> Result<Trader, BuildError> {
    let decision = config.to_decision_config()?;
    let prices = build_price_source(config)?;
    let ledger = Arc::new(CsvLedger::new(&config.paths.ledger));

    let balances = match ledger.last_filled()? {
        Some(anchor) => {
            let balances = PaperBalances::from_anchor(&anchor);
            info!(
                side = %anchor.side,
                base = balances.base,
                quote = balances.quote,
                "paper balances restored from ledger anchor"
            );
            balances
        }
        None => PaperBalances {
            base: config.exchange.paper_base,
            quote: config.exchange.paper_quote,
        },
    };

    let exchange = Arc::new(PaperExchange::new(
        prices,
        balances,
        config.exchange.slippage_bps,
        decision.fee_rate,
    ));
    let collaborators = Collaborators {
        snapshot: exchange.clone(),
        forecast: build_forecast(config),
        execution: exchange,
        ledger,
    };

    let mut trader = Trader::new(decision, collaborators, config.schedule.call_timeout());
    if let Some(path) = &config.paths.decision_log {
        trader = trader.with_decision_log(DecisionLog::new(path), config.fingerprint());
    }
    Ok(trader)
}

/// Which asset the bootstrap position is held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holding {
    Base,
    Quote,
}

/// Why a starting position could not be recorded.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("ledger already has trades; refusing to seed")]
    NotEmpty,

    #[error("seed {what} must be positive and finite, got {value}")]
    InvalidAmount { what: &'static str, value: f64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Record the bootstrap anchor trade for an empty ledger.
///
/// Holding quote is recorded as a sell, holding base as a buy, so the first
/// eligible action is the opposite conversion.
pub fn seed_ledger(
    ledger: &dyn TradeLedger,
    holding: Holding,
    amount: f64,
    price: f64,
    now: DateTime<Utc>,
) -> Result<Trade, SeedError> {
    for (what, value) in [("amount", amount), ("price", price)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(SeedError::InvalidAmount { what, value });
        }
    }
    if !ledger.is_empty()? {
        return Err(SeedError::NotEmpty);
    }
    let trade = match holding {
        Holding::Base => Trade::seed_holding_base(now, amount, price),
        Holding::Quote => Trade::seed_holding_quote(now, amount, price),
    };
    ledger.append(&trade)?;
    info!(?holding, amount, price, "ledger seeded");
    Ok(trade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairtrader_core::domain::Side;
    use pairtrader_core::ledger::MemoryLedger;

    #[test]
    fn seeding_quote_records_a_sell_anchor() {
        let ledger = MemoryLedger::new();
        let t = seed_ledger(&ledger, Holding::Quote, 1.0, 0.05, Utc::now()).unwrap();
        assert_eq!(t.side, Side::Sell);
        assert!((t.base_amount - 20.0).abs() < 1e-9);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn seeding_base_records_a_buy_anchor() {
        let ledger = MemoryLedger::new();
        let t = seed_ledger(&ledger, Holding::Base, 3.0, 0.05, Utc::now()).unwrap();
        assert_eq!(t.side, Side::Buy);
        assert_eq!(t.base_amount, 3.0);
    }

    #[test]
    fn seeding_twice_is_refused() {
        let ledger = MemoryLedger::new();
        seed_ledger(&ledger, Holding::Quote, 1.0, 0.05, Utc::now()).unwrap();
        assert!(matches!(
            seed_ledger(&ledger, Holding::Quote, 1.0, 0.05, Utc::now()),
            Err(SeedError::NotEmpty)
        ));
    }

    #[test]
    fn bad_seed_values_are_refused() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            seed_ledger(&ledger, Holding::Base, 0.0, 0.05, Utc::now()),
            Err(SeedError::InvalidAmount { what: "amount", .. })
        ));
        assert!(matches!(
            seed_ledger(&ledger, Holding::Base, 1.0, f64::NAN, Utc::now()),
            Err(SeedError::InvalidAmount { what: "price", .. })
        ));
        assert_eq!(ledger.len(), 0);
    }
}
