//! pairtrader runner: decision cycles, scheduling, configuration, auditing.
//!
//! This crate builds on `pairtrader-core` to provide:
//! - TOML configuration with validation and a decision-rule fingerprint
//! - The per-cycle orchestration of snapshot, forecast, decide, execute, record
//! - Per-call deadlines for collaborator calls
//! - A scheduler with exponential backoff and a stop flag
//! - The JSONL decision audit log
//! - Ledger seeding and summaries
//! - Offline backtests over candle history
//! - Tracing subscriber setup

pub mod audit;
pub mod backtest;
pub mod bot;
pub mod config;
pub mod cycle;
pub mod logging;
pub mod schedule;
pub mod summary;
pub mod timeout;

pub use audit::{Collaborator, CollaboratorFailure, DecisionLog, DecisionRecord, ExecutionOutcome};
pub use backtest::{
    export_round_trips, run_backtest, BacktestError, BacktestReport, BacktestSettings, RoundTrip,
};
pub use bot::{build_forecast, build_price_source, build_trader, seed_ledger, BuildError, Holding, SeedError};
pub use config::{BotConfig, ConfigError, PriceSourceKind};
pub use cycle::{Collaborators, CycleError, CycleMode, CycleReport, Trader};
pub use logging::init_logging;
pub use schedule::{run_loop, Backoff, LoopSummary};
pub use summary::LedgerSummary;
