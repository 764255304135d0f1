use super::pair::Pair;
use serde::{Deserialize, Serialize};

/// Price and free balances for a pair, fetched once per decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub pair: Pair,
    pub last_price: f64,
    pub free_base: f64,
    pub free_quote: f64,
}

impl MarketSnapshot {
    /// Price must be finite and positive; balances finite and non-negative.
    pub fn is_valid(&self) -> bool {
        self.last_price.is_finite()
            && self.last_price > 0.0
            && self.free_base.is_finite()
            && self.free_base >= 0.0
            && self.free_quote.is_finite()
            && self.free_quote >= 0.0
    }
}
