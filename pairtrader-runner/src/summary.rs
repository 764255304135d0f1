//! Ledger statistics for `pairtrader ledger summary`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pairtrader_core::domain::{Side, Trade};
use pairtrader_core::ledger::{LedgerError, TradeLedger};

/// Counts and growth over a whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub trades: usize,
    pub buys: usize,
    pub sells: usize,
    pub rejected: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    /// Growth of quote holdings between the first and last filled sells.
    pub quote_growth: Option<f64>,
    /// Growth of base holdings between the first and last filled buys.
    pub base_growth: Option<f64>,
}

impl LedgerSummary {
    /// Summarize `trades` in ledger order.
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut s = Self::default();
        let mut first_sell: Option<&Trade> = None;
        let mut last_sell: Option<&Trade> = None;
        let mut first_buy: Option<&Trade> = None;
        let mut last_buy: Option<&Trade> = None;

        for t in trades {
            s.trades += 1;
            s.first.get_or_insert(t.timestamp);
            s.last = Some(t.timestamp);
            if !t.is_filled() {
                s.rejected += 1;
                continue;
            }
            match t.side {
                Side::Buy => {
                    s.buys += 1;
                    first_buy.get_or_insert(t);
                    last_buy = Some(t);
                }
                Side::Sell => {
                    s.sells += 1;
                    first_sell.get_or_insert(t);
                    last_sell = Some(t);
                }
            }
        }

        s.quote_growth = growth(first_sell.map(|t| t.quote_amount), last_sell.map(|t| t.quote_amount));
        s.base_growth = growth(first_buy.map(|t| t.base_amount), last_buy.map(|t| t.base_amount));
        s
    }

    /// Summarize every trade in `ledger`.
    pub fn from_ledger(ledger: &dyn TradeLedger) -> Result<Self, LedgerError> {
        let trades: Vec<Trade> = ledger.all()?.collect::<Result<_, _>>()?;
        Ok(Self::from_trades(&trades))
    }
}

fn growth(first: Option<f64>, last: Option<f64>) -> Option<f64> {
    match (first, last) {
        (Some(a), Some(b)) if a > 0.0 => Some(b / a - 1.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pairtrader_core::domain::TradeStatus;
    use pairtrader_core::ledger::MemoryLedger;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn counts_and_growth() {
        let ledger = MemoryLedger::new();
        ledger.append(&Trade::seed_holding_quote(t(0), 1.0, 0.05)).unwrap();
        ledger.append(&Trade::filled(t(10), Side::Buy, 22.0, 0.045)).unwrap();
        let mut rejected = Trade::filled(t(20), Side::Sell, 22.0, 0.046);
        rejected.status = TradeStatus::Rejected;
        ledger.append(&rejected).unwrap();
        let sell = Trade::filled(t(30), Side::Sell, 22.0, 0.05);
        ledger.append(&sell).unwrap();

        let s = LedgerSummary::from_ledger(&ledger).unwrap();
        assert_eq!((s.trades, s.buys, s.sells, s.rejected), (4, 1, 2, 1));
        assert_eq!(s.first, Some(t(0)));
        assert_eq!(s.last, Some(t(30)));
        let g = s.quote_growth.unwrap();
        assert!((g - (22.0 * 0.05 / 1.0 - 1.0)).abs() < 1e-12);
        assert_eq!(s.base_growth, Some(0.0));
    }

    #[test]
    fn empty_ledger_has_no_growth() {
        let s = LedgerSummary::from_trades(&[]);
        assert_eq!(s, LedgerSummary::default());
    }
}
