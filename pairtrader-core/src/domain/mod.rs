//! Domain types for the pair trader.

pub mod forecast;
pub mod pair;
pub mod snapshot;
pub mod trade;

pub use forecast::{BandError, Forecast};
pub use pair::{Pair, PairError};
pub use snapshot::MarketSnapshot;
pub use trade::{Side, Trade, TradeStatus};
