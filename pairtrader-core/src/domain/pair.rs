//! Two-asset trading pair (`BASE/QUOTE`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why a pair symbol was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairError {
    #[error("pair '{0}' must have the form BASE/QUOTE")]
    Malformed(String),
    #[error("pair '{0}' uses the same asset on both sides")]
    SameAsset(String),
}

/// A base asset traded against a quote asset, e.g. `ETH/BTC`.
///
/// Buying spends quote to receive base; selling spends base to receive quote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    base: String,
    quote: String,
}

impl Pair {
    /// Build a pair from asset codes; codes are upper-cased.
    pub fn new(base: &str, quote: &str) -> Result<Self, PairError> {
        format!("{base}/{quote}").parse()
    }

    /// The asset being bought and sold.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The asset prices are expressed in.
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Concatenated symbol used by exchange REST APIs (`ETHBTC`).
    pub fn exchange_symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = PairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| PairError::Malformed(s.to_string()))?;
        let base = base.trim().to_ascii_uppercase();
        let quote = quote.trim().to_ascii_uppercase();
        let valid = |a: &str| !a.is_empty() && a.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(&base) || !valid(&quote) {
            return Err(PairError::Malformed(s.to_string()));
        }
        if base == quote {
            return Err(PairError::SameAsset(s.to_string()));
        }
        Ok(Self { base, quote })
    }
}

impl TryFrom<String> for Pair {
    type Error = PairError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.to_string()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
