//! Append-only trade ledger.
//!
//! The ledger is the only durable state of the bot. Its last filled trade is
//! the anchor the decision engine reasons from, so "no history yet" and
//! "history unreadable" must never be confused: a missing store is an empty
//! ledger, any other failure is a [`LedgerError`].

pub mod csv_ledger;
pub mod memory;

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::Trade;

pub use csv_ledger::{CsvLedger, CsvTrades, LEDGER_HEADER};
pub use memory::MemoryLedger;

/// Failures reading or writing the ledger. Never means "empty".
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode trade record: {0}")]
    Encode(String),

    #[error("trade at {attempted} is older than the last recorded trade at {last}")]
    NonMonotonic {
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("refusing to record malformed trade: {0}")]
    InvalidTrade(String),
}

impl LedgerError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Lazy, finite sequence of trades in insertion order.
pub type Trades<'a> = Box<dyn Iterator<Item = Result<Trade, LedgerError>> + 'a>;

/// Durable, append-only record of executed trades.
pub trait TradeLedger: Send + Sync {
    /// Record a trade. Fails if the store is unwritable or the trade would
    /// break timestamp ordering.
    fn append(&self, trade: &Trade) -> Result<(), LedgerError>;

    /// Iterate all trades from the beginning. Each call starts a fresh pass.
    fn all(&self) -> Result<Trades<'_>, LedgerError>;

    /// Most recently appended trade, if any.
    fn last(&self) -> Result<Option<Trade>, LedgerError> {
        let mut last = None;
        for trade in self.all()? {
            last = Some(trade?);
        }
        Ok(last)
    }

    /// Most recent filled trade: the position anchor.
    fn last_filled(&self) -> Result<Option<Trade>, LedgerError> {
        let mut last = None;
        for trade in self.all()? {
            let trade = trade?;
            if trade.is_filled() {
                last = Some(trade);
            }
        }
        Ok(last)
    }

    /// True when nothing has been recorded yet.
    fn is_empty(&self) -> Result<bool, LedgerError> {
        match self.all()?.next() {
            None => Ok(true),
            Some(Ok(_)) => Ok(false),
            Some(Err(e)) => Err(e),
        }
    }
}

/// Shared pre-append checks for every backend.
pub(crate) fn check_append(last: Option<&Trade>, trade: &Trade) -> Result<(), LedgerError> {
    if !trade.is_well_formed() {
        return Err(LedgerError::InvalidTrade(format!(
            "base={} quote={} price={}",
            trade.base_amount, trade.quote_amount, trade.average_price
        )));
    }
    if let Some(last) = last {
        if trade.timestamp < last.timestamp {
            return Err(LedgerError::NonMonotonic {
                last: last.timestamp,
                attempted: trade.timestamp,
            });
        }
    }
    Ok(())
}
