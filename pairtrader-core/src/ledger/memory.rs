//! In-process ledger for dry runs and tests.

use std::sync::{PoisonError, RwLock};

use super::{check_append, LedgerError, TradeLedger, Trades};
use crate::domain::Trade;

/// Ledger held in memory; lost on drop.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    trades: RwLock<Vec<Trade>>,
}

impl MemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing history, e.g. a copy of a file ledger for a dry run.
    pub fn with_trades(trades: Vec<Trade>) -> Self {
        Self {
            trades: RwLock::new(trades),
        }
    }

    /// Number of stored trades, rejected ones included.
    pub fn len(&self) -> usize {
        self.trades.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl TradeLedger for MemoryLedger {
    fn append(&self, trade: &Trade) -> Result<(), LedgerError> {
        let mut trades = self.trades.write().unwrap_or_else(PoisonError::into_inner);
        check_append(trades.last(), trade)?;
        trades.push(trade.clone());
        Ok(())
    }

    fn all(&self) -> Result<Trades<'_>, LedgerError> {
        // Snapshot so the iterator never holds the lock.
        let trades = self.trades.read().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(Box::new(trades.into_iter().map(Ok)))
    }

    fn last(&self) -> Result<Option<Trade>, LedgerError> {
        Ok(self
            .trades
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use chrono::{Duration, Utc};

    #[test]
    fn append_then_last() {
        let ledger = MemoryLedger::new();
        let t = Trade::filled(Utc::now(), Side::Buy, 1.0, 0.05);
        ledger.append(&t).unwrap();
        assert_eq!(ledger.last().unwrap(), Some(t));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn enforces_ordering() {
        let now = Utc::now();
        let ledger = MemoryLedger::with_trades(vec![Trade::filled(now, Side::Buy, 1.0, 0.05)]);
        let older = Trade::filled(now - Duration::seconds(1), Side::Sell, 1.0, 0.05);
        assert!(matches!(ledger.append(&older), Err(LedgerError::NonMonotonic { .. })));
    }
}
