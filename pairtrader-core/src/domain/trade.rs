//! One executed market order, as recorded in the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a market order, seen from the base asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that unwinds this one.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Outcome of a submitted order as stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Filled,
    Rejected,
}

/// Immutable record of one executed order.
///
/// Field order matches the ledger CSV header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub base_amount: f64,
    pub quote_amount: f64,
    pub average_price: f64,
    pub status: TradeStatus,
}

impl Trade {
    /// A filled trade whose quote amount is derived from the fill price.
    pub fn filled(timestamp: DateTime<Utc>, side: Side, base_amount: f64, average_price: f64) -> Self {
        Self {
            timestamp,
            side,
            base_amount,
            quote_amount: base_amount * average_price,
            average_price,
            status: TradeStatus::Filled,
        }
    }

    /// Bootstrap anchor for a position that starts out holding the base asset.
    ///
    /// Recorded as a buy of `base_amount` at `price`, so the next eligible
    /// action is a sell.
    pub fn seed_holding_base(timestamp: DateTime<Utc>, base_amount: f64, price: f64) -> Self {
        Self::filled(timestamp, Side::Buy, base_amount, price)
    }

    /// Bootstrap anchor for a position that starts out holding the quote asset.
    pub fn seed_holding_quote(timestamp: DateTime<Utc>, quote_amount: f64, price: f64) -> Self {
        Self {
            timestamp,
            side: Side::Sell,
            base_amount: quote_amount / price,
            quote_amount,
            average_price: price,
            status: TradeStatus::Filled,
        }
    }

    /// Only filled trades can serve as the anchor.
    pub fn is_filled(&self) -> bool {
        self.status == TradeStatus::Filled
    }

    /// `quote_amount / base_amount`, or `None` for an empty fill.
    pub fn implied_price(&self) -> Option<f64> {
        (self.base_amount > 0.0).then(|| self.quote_amount / self.base_amount)
    }

    /// Relative gap between the recorded average price and the implied price.
    pub fn price_drift(&self) -> Option<f64> {
        self.implied_price()
            .map(|implied| (implied - self.average_price).abs() / self.average_price)
    }

    /// Structural checks: finite non-negative amounts and a positive price.
    pub fn is_well_formed(&self) -> bool {
        self.base_amount.is_finite()
            && self.base_amount >= 0.0
            && self.quote_amount.is_finite()
            && self.quote_amount >= 0.0
            && self.average_price.is_finite()
            && self.average_price > 0.0
    }
}
