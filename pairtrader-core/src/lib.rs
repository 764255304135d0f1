//! pairtrader core: decision engine, trade ledger, collaborator interfaces.
//!
//! - Domain types (pair, snapshot, forecast band, trade)
//! - Pure decision function from snapshot + anchor trade + forecast to an action
//! - Append-only trade ledger with a durable CSV backend
//! - Snapshot, forecast, and execution interfaces with paper, HTTP, replay,
//!   and file-backed implementations

pub mod domain;
pub mod engine;
pub mod ledger;
pub mod provider;
