//! Simulated exchange account.
//!
//! Holds free balances in memory, prices from any [`PriceSource`], and fills
//! market orders immediately. Orders fill at the price seen by the most
//! recent snapshot, moved `slippage_bps` against the trader, with `fee_rate`
//! charged on the asset received.
//!
//! Recorded fills carry what actually changed hands: a buy stores the net
//! base received and the quote spent, a sell stores the base sold and the
//! net quote received.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ExecutionAdapter, PriceSource, ProviderError, SnapshotProvider};
use crate::domain::{MarketSnapshot, Pair, Side, Trade, TradeStatus};

/// Tolerance for float noise when an order spends the whole balance.
const BALANCE_EPSILON: f64 = 1e-9;

/// Free balances of a paper account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaperBalances {
    pub base: f64,
    pub quote: f64,
}

impl PaperBalances {
    /// Balances implied by the last filled trade: a buy leaves its base
    /// amount held, a sell leaves its quote amount held.
    pub fn from_anchor(anchor: &Trade) -> Self {
        match anchor.side {
            Side::Buy => Self {
                base: anchor.base_amount,
                quote: 0.0,
            },
            Side::Sell => Self {
                base: 0.0,
                quote: anchor.quote_amount,
            },
        }
    }
}

#[derive(Debug)]
struct Account {
    balances: PaperBalances,
    last_price: Option<f64>,
    /// Simulated clock for fills; wall time when unset.
    clock: Option<DateTime<Utc>>,
}

/// Paper account serving both snapshots and order execution.
pub struct PaperExchange {
    prices: Arc<dyn PriceSource>,
    account: Mutex<Account>,
    slippage_bps: f64,
    fee_rate: f64,
}

impl PaperExchange {
    /// Account starting from `balances`. Slippage is in basis points.
    pub fn new(prices: Arc<dyn PriceSource>, balances: PaperBalances, slippage_bps: f64, fee_rate: f64) -> Self {
        Self {
            prices,
            account: Mutex::new(Account {
                balances,
                last_price: None,
                clock: None,
            }),
            slippage_bps: slippage_bps.max(0.0),
            fee_rate: fee_rate.clamp(0.0, 1.0),
        }
    }

    /// Stamp subsequent fills with `now` instead of wall time. Used when
    /// replaying history.
    pub fn set_time(&self, now: DateTime<Utc>) {
        self.account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clock = Some(now);
    }

    /// Current free balances.
    pub fn balances(&self) -> PaperBalances {
        self.account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .balances
    }

    fn fill_price(&self, reference: f64, side: Side) -> f64 {
        let slip = self.slippage_bps / 10_000.0;
        match side {
            Side::Buy => reference * (1.0 + slip),
            Side::Sell => reference * (1.0 - slip),
        }
    }
}

impl SnapshotProvider for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    fn snapshot(&self, pair: &Pair) -> Result<MarketSnapshot, ProviderError> {
        let price = self.prices.last_price(pair)?;
        let mut account = self.account.lock().unwrap_or_else(PoisonError::into_inner);
        account.last_price = Some(price);
        Ok(MarketSnapshot {
            pair: pair.clone(),
            last_price: price,
            free_base: account.balances.base,
            free_quote: account.balances.quote,
        })
    }
}

impl ExecutionAdapter for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    fn submit_market_order(&self, pair: &Pair, side: Side, base_amount: f64) -> Result<Trade, ProviderError> {
        if !base_amount.is_finite() || base_amount <= 0.0 {
            return Err(ProviderError::Rejected(format!(
                "order amount must be positive, got {base_amount}"
            )));
        }

        let cached = self
            .account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_price;
        let reference = match cached {
            Some(p) => p,
            None => self.prices.last_price(pair)?,
        };
        let fill = self.fill_price(reference, side);

        let mut account = self.account.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamp = account.clock.unwrap_or_else(Utc::now);
        let balances = &mut account.balances;
        let trade = match side {
            Side::Buy => {
                let cost_at_reference = base_amount * reference;
                if cost_at_reference > balances.quote * (1.0 + BALANCE_EPSILON) {
                    return Err(ProviderError::Rejected(format!(
                        "insufficient {}: need {cost_at_reference}, free {}",
                        pair.quote(),
                        balances.quote
                    )));
                }
                // Slippage may push the cost past the balance; fill what it buys.
                let gross = base_amount.min(balances.quote / fill);
                let spent = (gross * fill).min(balances.quote);
                let received = gross * (1.0 - self.fee_rate);
                balances.quote -= spent;
                balances.base += received;
                Trade {
                    timestamp,
                    side,
                    base_amount: received,
                    quote_amount: spent,
                    average_price: fill,
                    status: TradeStatus::Filled,
                }
            }
            Side::Sell => {
                if base_amount > balances.base * (1.0 + BALANCE_EPSILON) {
                    return Err(ProviderError::Rejected(format!(
                        "insufficient {}: need {base_amount}, free {}",
                        pair.base(),
                        balances.base
                    )));
                }
                let sold = base_amount.min(balances.base);
                let received = sold * fill * (1.0 - self.fee_rate);
                balances.base -= sold;
                balances.quote += received;
                Trade {
                    timestamp,
                    side,
                    base_amount: sold,
                    quote_amount: received,
                    average_price: fill,
                    status: TradeStatus::Filled,
                }
            }
        };

        info!(
            %pair,
            side = %trade.side,
            base = trade.base_amount,
            quote = trade.quote_amount,
            price = trade.average_price,
            "paper order filled"
        );
        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ReplayPrices;

    fn pair() -> Pair {
        "ETH/BTC".parse().unwrap()
    }

    fn exchange(prices: Vec<f64>, base: f64, quote: f64, slippage_bps: f64, fee: f64) -> PaperExchange {
        PaperExchange::new(
            Arc::new(ReplayPrices::from_prices(prices)),
            PaperBalances { base, quote },
            slippage_bps,
            fee,
        )
    }

    #[test]
    fn snapshot_reports_price_and_balances() {
        let ex = exchange(vec![0.05], 0.0, 1.0, 0.0, 0.0);
        let snap = ex.snapshot(&pair()).unwrap();
        assert_eq!(snap.last_price, 0.05);
        assert_eq!(snap.free_quote, 1.0);
        assert_eq!(snap.free_base, 0.0);
    }

    #[test]
    fn buy_spends_quote_and_charges_fee_on_base() {
        let ex = exchange(vec![0.05], 0.0, 1.0, 0.0, 0.001);
        ex.snapshot(&pair()).unwrap();
        let trade = ex.submit_market_order(&pair(), Side::Buy, 20.0).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert!((trade.quote_amount - 1.0).abs() < 1e-12);
        assert!((trade.base_amount - 20.0 * 0.999).abs() < 1e-9);

        let b = ex.balances();
        assert!(b.quote.abs() < 1e-12);
        assert!((b.base - 19.98).abs() < 1e-9);
    }

    #[test]
    fn slippage_moves_price_against_trader() {
        let ex = exchange(vec![0.05, 0.05], 10.0, 1.0, 10.0, 0.0);
        ex.snapshot(&pair()).unwrap();
        let sell = ex.submit_market_order(&pair(), Side::Sell, 1.0).unwrap();
        assert!(sell.average_price < 0.05);
        let buy = ex.submit_market_order(&pair(), Side::Buy, 1.0).unwrap();
        assert!(buy.average_price > 0.05);
    }

    #[test]
    fn buying_the_whole_balance_with_slippage_still_fills() {
        let ex = exchange(vec![0.05], 0.0, 1.0, 25.0, 0.0);
        let snap = ex.snapshot(&pair()).unwrap();
        let trade = ex
            .submit_market_order(&pair(), Side::Buy, snap.free_quote / snap.last_price)
            .unwrap();
        assert!(trade.quote_amount <= 1.0);
        assert!(ex.balances().quote >= 0.0);
    }

    #[test]
    fn oversize_and_non_positive_orders_are_rejected() {
        let ex = exchange(vec![0.05], 1.0, 0.01, 0.0, 0.0);
        ex.snapshot(&pair()).unwrap();
        assert!(matches!(
            ex.submit_market_order(&pair(), Side::Sell, 2.0),
            Err(ProviderError::Rejected(_))
        ));
        assert!(matches!(
            ex.submit_market_order(&pair(), Side::Buy, 1.0),
            Err(ProviderError::Rejected(_))
        ));
        assert!(matches!(
            ex.submit_market_order(&pair(), Side::Buy, 0.0),
            Err(ProviderError::Rejected(_))
        ));
        assert_eq!(ex.balances(), PaperBalances { base: 1.0, quote: 0.01 });
    }

    #[test]
    fn balances_follow_the_anchor_side() {
        let t0 = Utc::now();
        let bought = Trade::filled(t0, Side::Buy, 22.2, 0.045);
        assert_eq!(
            PaperBalances::from_anchor(&bought),
            PaperBalances { base: 22.2, quote: 0.0 }
        );
        let sold = Trade::seed_holding_quote(t0, 1.0, 0.05);
        assert_eq!(
            PaperBalances::from_anchor(&sold),
            PaperBalances { base: 0.0, quote: 1.0 }
        );
    }

    #[test]
    fn fills_use_the_simulated_clock_when_set() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let ex = exchange(vec![0.05], 2.0, 0.0, 0.0, 0.0);
        ex.set_time(at);
        ex.snapshot(&pair()).unwrap();
        let trade = ex.submit_market_order(&pair(), Side::Sell, 2.0).unwrap();
        assert_eq!(trade.timestamp, at);
    }

    #[test]
    fn price_failure_is_unavailable() {
        let ex = exchange(vec![], 1.0, 0.0, 0.0, 0.0);
        assert!(matches!(
            ex.snapshot(&pair()),
            Err(ProviderError::Unavailable(_))
        ));
    }
}
